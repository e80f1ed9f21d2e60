//! SOCKS5 request parsing and command dispatch
//!
//! After authentication, the client's request is parsed and routed to
//! the CONNECT, BIND, or UDP ASSOCIATE handler. Every failed request is
//! answered with exactly one reply carrying the matching REP code
//! before the connection is closed; a success reply is followed by the
//! relay phase.

use crate::address::Address;
use crate::protocol::{AddressType, Command, RSV, ReplyCode, Version};
use crate::relay::relay_tcp;
use crate::udp::UdpAssociate;
use anyhow::{Result, anyhow, bail};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info};

/// Request is a parsed post-authentication client request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub command: Command,
    pub dest: Address,
}

/// handle_request parses the client request and executes the command,
/// including the relay phase for successful CONNECT/BIND/UDP ASSOCIATE
pub async fn handle_request(
    stream: &mut TcpStream,
    bind_timeout: Duration,
    udp_idle_timeout: Duration,
) -> Result<()> {
    // SOCKS5 request format
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    // A non-SOCKS5 request closes the connection with no reply bytes
    if header[0] != Version::SOCKS5 as u8 {
        bail!("unsupported SOCKS version in request: {}", header[0]);
    }

    if header[2] != RSV {
        send_reply(stream, ReplyCode::CommandNotSupported, None).await?;
        bail!("nonzero reserved byte in request: {}", header[2]);
    }

    let Some(command) = Command::from_byte(header[1]) else {
        send_reply(stream, ReplyCode::CommandNotSupported, None).await?;
        bail!("unknown command: {}", header[1]);
    };

    let Some(addr_type) = AddressType::from_byte(header[3]) else {
        send_reply(stream, ReplyCode::AddrTypeNotSupported, None).await?;
        bail!("unsupported address type: {}", header[3]);
    };

    let dest = Address::read_from(stream, addr_type).await?;
    let request = Request { command, dest };

    debug!("request: {:?} to {}", request.command, request.dest);

    match request.command {
        Command::Connect => handle_connect(stream, request.dest).await,
        Command::Bind => handle_bind(stream, request.dest, bind_timeout).await,
        Command::UdpAssociate => handle_udp_associate(stream, udp_idle_timeout).await,
    }
}

// ================
// CONNECT COMMAND
// ================

/// handle_connect resolves the destination, opens the outbound TCP
/// connection, replies with its locally bound address, and relays
async fn handle_connect(stream: &mut TcpStream, dest: Address) -> Result<()> {
    let candidates = match dest.resolve().await {
        Ok(candidates) => candidates,
        Err(e) => {
            send_reply(stream, ReplyCode::HostUnreachable, None).await?;
            return Err(e);
        }
    };

    let mut outbound = match connect_to_candidates(&candidates).await {
        Ok(outbound) => outbound,
        Err(e) => {
            send_reply(stream, ReplyCode::from_io_error(&e), None).await?;
            return Err(anyhow!(e).context(format!("failed to connect to {dest}")));
        }
    };

    send_reply(stream, ReplyCode::Succeeded, Some(outbound.local_addr()?)).await?;

    info!("CONNECT established to {dest}");

    relay_tcp(stream, &mut outbound).await?;
    Ok(())
}

/// connect_to_candidates attempts a TCP connection to each resolved
/// address in order, returning the first that succeeds or the last error
async fn connect_to_candidates(candidates: &[SocketAddr]) -> std::io::Result<TcpStream> {
    let mut last_err = None;

    for &candidate in candidates {
        match TcpStream::connect(candidate).await {
            Ok(outbound) => return Ok(outbound),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| std::io::Error::other("no candidate addresses")))
}

// =============
// BIND COMMAND
// =============

/// handle_bind opens an ephemeral listener, announces it to the client,
/// and waits (bounded) for a single inbound connection. Success produces
/// a second reply naming the accepted peer, then relaying begins.
async fn handle_bind(stream: &mut TcpStream, dest: Address, bind_timeout: Duration) -> Result<()> {
    let listen_ip = stream.local_addr()?.ip();

    let listener = match TcpListener::bind(SocketAddr::new(listen_ip, 0)).await {
        Ok(listener) => listener,
        Err(e) => {
            send_reply(stream, ReplyCode::ServerFailure, None).await?;
            return Err(anyhow!(e).context("failed to allocate BIND listener"));
        }
    };

    let bound_addr = listener.local_addr()?;

    // First reply announces the listening address
    send_reply(stream, ReplyCode::Succeeded, Some(bound_addr)).await?;

    info!("BIND listening on {bound_addr} for {dest}");

    let (mut inbound, peer_addr) = match timeout(bind_timeout, listener.accept()).await {
        Ok(Ok(accepted)) => accepted,
        Ok(Err(e)) => {
            send_reply(stream, ReplyCode::ServerFailure, None).await?;
            return Err(anyhow!(e).context("BIND accept failed"));
        }
        Err(_) => {
            send_reply(stream, ReplyCode::TtlExpired, None).await?;
            bail!("no inbound connection within {bind_timeout:?}");
        }
    };

    // Exactly one inbound connection is accepted
    drop(listener);

    // Second reply announces the accepted peer
    send_reply(stream, ReplyCode::Succeeded, Some(peer_addr)).await?;

    info!("BIND accepted connection from {peer_addr}");

    relay_tcp(stream, &mut inbound).await?;
    Ok(())
}

// ======================
// UDP ASSOCIATE COMMAND
// ======================

/// handle_udp_associate allocates the relay and outbound UDP sockets,
/// announces the relay address, and runs the association until the
/// control connection closes or the idle timeout elapses
async fn handle_udp_associate(stream: &mut TcpStream, idle_timeout: Duration) -> Result<()> {
    let local_ip = stream.local_addr()?.ip();
    let control_peer = stream.peer_addr()?.ip();

    let sockets = async {
        let relay_socket = UdpSocket::bind(SocketAddr::new(local_ip, 0)).await?;
        let outbound = UdpSocket::bind("0.0.0.0:0").await?;
        std::io::Result::Ok((relay_socket, outbound))
    };

    let (relay_socket, outbound) = match sockets.await {
        Ok(sockets) => sockets,
        Err(e) => {
            send_reply(stream, ReplyCode::ServerFailure, None).await?;
            return Err(anyhow!(e).context("failed to allocate UDP relay sockets"));
        }
    };

    let relay_addr = relay_socket.local_addr()?;
    send_reply(stream, ReplyCode::Succeeded, Some(relay_addr)).await?;

    UdpAssociate::new(relay_socket, outbound, relay_addr, control_peer, idle_timeout)
        .run(stream)
        .await
}

// =========
// HELPERS
// =========

/// send_reply writes a SOCKS5 reply; a missing bound address is encoded
/// as 0.0.0.0:0 (the convention for failure replies)
pub async fn send_reply<S>(
    stream: &mut S,
    reply_code: ReplyCode,
    bound_addr: Option<SocketAddr>,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    // SOCKS5 reply format
    // +----+-----+-------+------+----------+----------+
    // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    let bound_addr = bound_addr
        .unwrap_or_else(|| SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0));

    let mut reply = vec![Version::SOCKS5 as u8, reply_code as u8, RSV];
    Address::Ip(bound_addr).write_to(&mut reply);

    stream.write_all(&reply).await?;
    Ok(())
}
