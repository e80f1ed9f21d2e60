//! SOCKS5 UDP ASSOCIATE relay
//!
//! Implements the datagram header codec and the relay loop tied to the
//! lifetime of the TCP control connection. The relay locks onto the
//! first client source address observed and silently drops datagrams
//! from anyone else; fragmented datagrams (FRAG != 0) are dropped.

use crate::address::Address;
use crate::protocol::MAX_DGRAM;
use anyhow::{Result, bail};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

/// UdpPacket is a decoded SOCKS5 UDP datagram
///
/// # UDP Request/Response Format
///
/// ```text
/// +----+------+------+----------+----------+----------+
/// |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
/// +----+------+------+----------+----------+----------+
/// | 2  |  1   |  1   | Variable |    2     | Variable |
/// +----+------+------+----------+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct UdpPacket {
    /// Fragment number; anything nonzero is unsupported
    pub frag: u8,
    /// Destination (client -> relay) or source (relay -> client)
    pub addr: Address,
    /// Datagram payload
    pub payload: Vec<u8>,
}

/// UdpPacket implementation block
impl UdpPacket {
    /// parse decodes a datagram received from the client
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            bail!("UDP packet too short: {} bytes", data.len());
        }

        if data[0] != 0 || data[1] != 0 {
            bail!("nonzero RSV field in UDP packet");
        }

        let frag = data[2];
        let atyp = data[3];

        let (addr, consumed) = Address::from_packet(atyp, &data[4..])?;
        let payload = data[4 + consumed..].to_vec();

        Ok(UdpPacket {
            frag,
            addr,
            payload,
        })
    }

    /// encode wraps a reply payload with the SOCKS5 UDP header for the
    /// given source address
    pub fn encode(from: SocketAddr, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x00, 0x00, 0x00]; // RSV + FRAG
        Address::Ip(from).write_to(&mut packet);
        packet.extend_from_slice(payload);
        packet
    }
}

/// UdpAssociate owns the sockets of one UDP association: the
/// client-facing relay socket and the outbound socket used to reach
/// destinations
pub struct UdpAssociate {
    relay_socket: UdpSocket,
    outbound: UdpSocket,
    relay_addr: SocketAddr,
    control_peer: IpAddr,
    idle_timeout: Duration,
}

/// UdpAssociate implementation block
impl UdpAssociate {
    /// new wires up an association; both sockets must already be bound
    pub fn new(
        relay_socket: UdpSocket,
        outbound: UdpSocket,
        relay_addr: SocketAddr,
        control_peer: IpAddr,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            relay_socket,
            outbound,
            relay_addr,
            control_peer,
            idle_timeout,
        }
    }

    /// run drives the relay until the TCP control connection closes or
    /// the association sits idle past its timeout. Both sockets are
    /// dropped on return, tearing the association down.
    pub async fn run(self, control: &mut TcpStream) -> Result<()> {
        info!("UDP relay listening on {}", self.relay_addr);

        // First client source observed; the only accepted sender afterwards
        let mut client_addr: Option<SocketAddr> = None;

        // Destinations this association has sent to; replies from any
        // other source are dropped
        let mut targets: HashSet<SocketAddr> = HashSet::new();

        let mut client_buf = vec![0u8; MAX_DGRAM];
        let mut reply_buf = vec![0u8; MAX_DGRAM];
        let mut ctrl_buf = [0u8; 64];

        let mut deadline = Instant::now() + self.idle_timeout;

        loop {
            tokio::select! {
                // The control connection only signals association lifetime
                read = control.read(&mut ctrl_buf) => {
                    match read {
                        Ok(0) => {
                            info!("control connection closed: terminating UDP association");
                            break;
                        }
                        Ok(_) => {
                            debug!("unexpected data on control connection during UDP association");
                        }
                        Err(e) => {
                            warn!("control connection error: {e}");
                            break;
                        }
                    }
                }

                // Client -> destination
                incoming = self.relay_socket.recv_from(&mut client_buf) => {
                    let (len, src) = incoming?;

                    match client_addr {
                        None => {
                            if src.ip() != self.control_peer {
                                warn!("rejected UDP datagram from unauthorized source: {src}");
                                continue;
                            }
                            client_addr = Some(src);
                        }
                        Some(expected) if src != expected => {
                            warn!("rejected UDP datagram from unauthorized source: {src}");
                            continue;
                        }
                        Some(_) => {}
                    }

                    deadline = Instant::now() + self.idle_timeout;

                    let packet = match UdpPacket::parse(&client_buf[..len]) {
                        Ok(packet) => packet,
                        Err(e) => {
                            debug!("dropped malformed UDP datagram from {src}: {e}");
                            continue;
                        }
                    };

                    // Fragmentation is not supported
                    if packet.frag != 0 {
                        debug!("dropped fragmented UDP datagram from {src}");
                        continue;
                    }

                    match packet.addr.resolve().await {
                        Ok(candidates) => {
                            let dest = candidates[0];
                            if let Err(e) = self.outbound.send_to(&packet.payload, dest).await {
                                warn!("failed to forward UDP datagram to {dest}: {e}");
                            } else {
                                targets.insert(dest);
                                debug!("forwarded {} bytes: {src} -> {dest}", packet.payload.len());
                            }
                        }
                        Err(e) => {
                            debug!("dropped UDP datagram for unresolvable destination {}: {e}", packet.addr);
                        }
                    }
                }

                // Destination -> client
                reply = self.outbound.recv_from(&mut reply_buf) => {
                    let (len, from) = reply?;

                    // Only destinations this association has contacted
                    // may send replies into the tunnel
                    if !targets.contains(&from) {
                        warn!("dropped UDP reply from uncontacted source: {from}");
                        continue;
                    }

                    let Some(client) = client_addr else {
                        debug!("dropped UDP reply from {from}: no client established");
                        continue;
                    };

                    deadline = Instant::now() + self.idle_timeout;

                    let packet = UdpPacket::encode(from, &reply_buf[..len]);
                    if let Err(e) = self.relay_socket.send_to(&packet, client).await {
                        warn!("failed to send UDP reply to client {client}: {e}");
                    } else {
                        debug!("relayed {len} bytes: {from} -> {client}");
                    }
                }

                _ = sleep_until(deadline) => {
                    info!("UDP association idle for {:?}: tearing down", self.idle_timeout);
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_encode_ipv4() {
        let from: SocketAddr = "10.0.0.1:53".parse().unwrap();
        let packet = UdpPacket::encode(from, b"test");

        // RSV (2) + FRAG (1) + ATYP (1) + IPv4 (4) + PORT (2) + DATA (4)
        assert_eq!(packet.len(), 2 + 1 + 1 + 4 + 2 + 4);
        assert_eq!(&packet[0..3], &[0, 0, 0]);
        assert_eq!(packet[3], 0x01);
        assert_eq!(&packet[4..8], &[10, 0, 0, 1]);
        assert_eq!(&packet[8..10], &53u16.to_be_bytes());
        assert_eq!(&packet[10..], b"test");
    }

    #[test]
    fn test_parse_round_trip() {
        let from: SocketAddr = "192.168.1.100:9999".parse().unwrap();
        let encoded = UdpPacket::encode(from, b"payload");
        let parsed = UdpPacket::parse(&encoded).unwrap();

        assert_eq!(parsed.frag, 0);
        assert_eq!(parsed.addr, Address::Ip(from));
        assert_eq!(parsed.payload, b"payload");
    }

    #[test]
    fn test_parse_domain_destination() {
        let mut data = vec![0, 0, 0, 0x03, 8];
        data.extend_from_slice(b"test.com");
        data.extend_from_slice(&8080u16.to_be_bytes());
        data.extend_from_slice(b"hi");

        let parsed = UdpPacket::parse(&data).unwrap();
        assert_eq!(parsed.addr, Address::domain("test.com", 8080));
        assert_eq!(parsed.payload, b"hi");
    }

    #[test]
    fn test_parse_preserves_frag() {
        let from = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 1);
        let mut encoded = UdpPacket::encode(from, b"x");
        encoded[2] = 3;

        let parsed = UdpPacket::parse(&encoded).unwrap();
        assert_eq!(parsed.frag, 3);
    }

    #[test]
    fn test_parse_too_short() {
        assert!(UdpPacket::parse(&[0, 0, 0]).is_err());
    }

    #[test]
    fn test_parse_nonzero_rsv() {
        let from = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 1);
        let mut encoded = UdpPacket::encode(from, b"x");
        encoded[0] = 1;
        assert!(UdpPacket::parse(&encoded).is_err());
    }
}
