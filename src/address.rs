//! SOCKS5 address parsing and encoding
//!
//! Destinations and bound addresses are either a concrete socket address
//! (IPv4/IPv6) or a domain name plus port, encoded per RFC 1928.

use crate::protocol::{AddressType, MAX_DOMAIN_LEN};
use anyhow::{Context, Result, anyhow, bail};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Address is the tagged destination/bound address used in requests,
/// replies, and UDP datagram headers
#[derive(Debug, Clone, PartialEq)]
pub enum Address {
    /// IPv4 or IPv6 address with port
    Ip(SocketAddr),
    /// Domain name with port, resolved at connect time
    Domain(String, u16),
}

/// Address implementation block
impl Address {
    /// ipv4 constructs an IPv4 address
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        Address::Ip(SocketAddr::new(ip.into(), port))
    }

    /// ipv6 constructs an IPv6 address
    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        Address::Ip(SocketAddr::new(ip.into(), port))
    }

    /// domain constructs a domain-name address
    pub fn domain(name: impl Into<String>, port: u16) -> Self {
        Address::Domain(name.into(), port)
    }

    /// port returns the port component
    pub fn port(&self) -> u16 {
        match self {
            Address::Ip(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }

    /// read_from parses the address body (everything after the ATYP byte)
    /// from the stream: 4 bytes for IPv4, 1 length byte + N bytes for a
    /// domain name, 16 bytes for IPv6, each followed by a 2-byte
    /// big-endian port
    pub async fn read_from<S>(stream: &mut S, addr_type: AddressType) -> Result<Self>
    where
        S: AsyncRead + Unpin,
    {
        let addr = match addr_type {
            AddressType::IPv4 => {
                let mut octets = [0u8; 4];
                stream.read_exact(&mut octets).await?;
                let port = read_port(stream).await?;
                Address::ipv4(Ipv4Addr::from(octets), port)
            }
            AddressType::DomainName => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                let domain_len = len[0] as usize;
                if domain_len == 0 {
                    bail!("domain length cannot be 0");
                }

                let mut domain = vec![0u8; domain_len];
                stream.read_exact(&mut domain).await?;
                let domain =
                    String::from_utf8(domain).with_context(|| "invalid UTF-8 in domain name")?;

                let port = read_port(stream).await?;
                Address::domain(domain, port)
            }
            AddressType::IPv6 => {
                let mut octets = [0u8; 16];
                stream.read_exact(&mut octets).await?;
                let port = read_port(stream).await?;
                Address::ipv6(Ipv6Addr::from(octets), port)
            }
        };

        Ok(addr)
    }

    /// from_packet parses the address body from a UDP datagram header,
    /// given the ATYP byte and the buffer positioned right after it.
    /// Returns the address and the number of bytes consumed.
    pub fn from_packet(atyp: u8, buf: &[u8]) -> Result<(Self, usize)> {
        match atyp {
            0x01 => {
                if buf.len() < 6 {
                    bail!("not enough data for IPv4 address and port");
                }
                let octets: [u8; 4] = buf[..4].try_into()?;
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                Ok((Address::ipv4(Ipv4Addr::from(octets), port), 6))
            }
            0x03 => {
                let domain_len = *buf.first().context("not enough data for domain length")? as usize;
                if domain_len == 0 || domain_len > MAX_DOMAIN_LEN {
                    bail!("invalid domain length: {domain_len}");
                }
                if buf.len() < 1 + domain_len + 2 {
                    bail!("not enough data for domain and port");
                }
                let domain = String::from_utf8(buf[1..1 + domain_len].to_vec())
                    .with_context(|| "invalid UTF-8 in domain name")?;
                let port = u16::from_be_bytes([buf[1 + domain_len], buf[2 + domain_len]]);
                Ok((Address::domain(domain, port), 1 + domain_len + 2))
            }
            0x04 => {
                if buf.len() < 18 {
                    bail!("not enough data for IPv6 address and port");
                }
                let octets: [u8; 16] = buf[..16].try_into()?;
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                Ok((Address::ipv6(Ipv6Addr::from(octets), port), 18))
            }
            _ => Err(anyhow!("unknown address type: {atyp}")),
        }
    }

    /// write_to appends the ATYP byte, address bytes, and big-endian
    /// port to the buffer (the reply/datagram-header encoding)
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            Address::Ip(SocketAddr::V4(addr)) => {
                buf.push(AddressType::IPv4 as u8);
                buf.extend_from_slice(&addr.ip().octets());
                buf.extend_from_slice(&addr.port().to_be_bytes());
            }
            Address::Ip(SocketAddr::V6(addr)) => {
                buf.push(AddressType::IPv6 as u8);
                buf.extend_from_slice(&addr.ip().octets());
                buf.extend_from_slice(&addr.port().to_be_bytes());
            }
            Address::Domain(domain, port) => {
                buf.push(AddressType::DomainName as u8);
                buf.push(domain.len() as u8);
                buf.extend_from_slice(domain.as_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
            }
        }
    }

    /// resolve returns the candidate socket addresses for this address,
    /// in resolver order. An IP address resolves to itself.
    pub async fn resolve(&self) -> Result<Vec<SocketAddr>> {
        match self {
            Address::Ip(addr) => Ok(vec![*addr]),
            Address::Domain(domain, port) => {
                let candidates: Vec<SocketAddr> =
                    tokio::net::lookup_host((domain.as_str(), *port))
                        .await
                        .with_context(|| format!("failed to resolve host '{domain}'"))?
                        .collect();

                if candidates.is_empty() {
                    bail!("no IP address found for '{domain}'");
                }

                Ok(candidates)
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ip(addr) => write!(f, "{addr}"),
            Address::Domain(domain, port) => write!(f, "{domain}:{port}"),
        }
    }
}

/// read_port reads a 2-byte big-endian port from the stream
async fn read_port<S>(stream: &mut S) -> Result<u16>
where
    S: AsyncRead + Unpin,
{
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok(u16::from_be_bytes(port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_ipv4() {
        let mut cursor = Cursor::new(vec![192, 168, 1, 1, 0x1F, 0x90]);
        let addr = Address::read_from(&mut cursor, AddressType::IPv4)
            .await
            .unwrap();
        assert_eq!(addr, Address::ipv4(Ipv4Addr::new(192, 168, 1, 1), 8080));
        assert_eq!(addr.to_string(), "192.168.1.1:8080");
    }

    #[tokio::test]
    async fn test_read_domain() {
        let mut body = vec![11u8];
        body.extend_from_slice(b"example.com");
        body.extend_from_slice(&443u16.to_be_bytes());
        let mut cursor = Cursor::new(body);

        let addr = Address::read_from(&mut cursor, AddressType::DomainName)
            .await
            .unwrap();
        assert_eq!(addr, Address::domain("example.com", 443));
    }

    #[tokio::test]
    async fn test_read_ipv6() {
        let mut body = vec![0u8; 16];
        body[15] = 1; // ::1
        body.extend_from_slice(&80u16.to_be_bytes());
        let mut cursor = Cursor::new(body);

        let addr = Address::read_from(&mut cursor, AddressType::IPv6)
            .await
            .unwrap();
        assert_eq!(addr.port(), 80);
        match addr {
            Address::Ip(socket_addr) => assert!(socket_addr.ip().is_ipv6()),
            _ => panic!("expected IPv6 address"),
        }
    }

    #[tokio::test]
    async fn test_read_domain_zero_length() {
        let mut cursor = Cursor::new(vec![0u8, 0, 80]);
        let result = Address::read_from(&mut cursor, AddressType::DomainName).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_truncated() {
        let mut cursor = Cursor::new(vec![10u8, 0]);
        let result = Address::read_from(&mut cursor, AddressType::IPv4).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_from_packet_ipv4() {
        let buf = [10, 0, 0, 1, 0, 53, 0xAA, 0xBB];
        let (addr, consumed) = Address::from_packet(0x01, &buf).unwrap();
        assert_eq!(addr, Address::ipv4(Ipv4Addr::new(10, 0, 0, 1), 53));
        assert_eq!(consumed, 6);
    }

    #[test]
    fn test_from_packet_domain() {
        let mut buf = vec![8u8];
        buf.extend_from_slice(b"test.com");
        buf.extend_from_slice(&9000u16.to_be_bytes());
        buf.extend_from_slice(b"payload");

        let (addr, consumed) = Address::from_packet(0x03, &buf).unwrap();
        assert_eq!(addr, Address::domain("test.com", 9000));
        assert_eq!(consumed, 1 + 8 + 2);
    }

    #[test]
    fn test_from_packet_unknown_atyp() {
        assert!(Address::from_packet(0x02, &[0; 8]).is_err());
    }

    #[test]
    fn test_from_packet_short_buffer() {
        assert!(Address::from_packet(0x01, &[10, 0]).is_err());
        assert!(Address::from_packet(0x04, &[0; 10]).is_err());
    }

    #[test]
    fn test_write_to_ipv4() {
        let addr = Address::ipv4(Ipv4Addr::new(127, 0, 0, 1), 1080);
        let mut buf = Vec::new();
        addr.write_to(&mut buf);
        assert_eq!(buf, vec![0x01, 127, 0, 0, 1, 0x04, 0x38]);
    }

    #[test]
    fn test_write_to_domain() {
        let addr = Address::domain("a.io", 80);
        let mut buf = Vec::new();
        addr.write_to(&mut buf);
        assert_eq!(buf[0], 0x03);
        assert_eq!(buf[1], 4);
        assert_eq!(&buf[2..6], b"a.io");
        assert_eq!(&buf[6..8], &80u16.to_be_bytes());
    }

    #[tokio::test]
    async fn test_resolve_ip_is_identity() {
        let addr = Address::ipv4(Ipv4Addr::new(127, 0, 0, 1), 9999);
        let candidates = addr.resolve().await.unwrap();
        assert_eq!(candidates, vec!["127.0.0.1:9999".parse().unwrap()]);
    }
}
