//! SOCKS5 server: accept loop and per-connection supervision

use crate::auth::{Authenticator, CredentialStore, negotiate_auth};
use crate::commands;
use anyhow::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

/// Default bound on BIND's wait for its single inbound connection
pub const DEFAULT_BIND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle timeout after which an abandoned UDP association is
/// torn down
pub const DEFAULT_UDP_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server {
    pub listen_addr: String,
    authenticator: Authenticator,
    bind_timeout: Duration,
    udp_idle_timeout: Duration,
    listener: Option<TcpListener>,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new is a constructor for the Socks5Server type; the server starts
    /// out without authentication
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            authenticator: Authenticator::NoAuth,
            bind_timeout: DEFAULT_BIND_TIMEOUT,
            udp_idle_timeout: DEFAULT_UDP_IDLE_TIMEOUT,
            listener: None,
        }
    }

    /// with_credentials selects the authentication policy from the
    /// store: no-auth when empty, username/password otherwise
    pub fn with_credentials(mut self, store: CredentialStore) -> Self {
        self.authenticator = Authenticator::from_store(store);
        self
    }

    /// with_bind_timeout overrides the BIND accept bound
    pub fn with_bind_timeout(mut self, timeout: Duration) -> Self {
        self.bind_timeout = timeout;
        self
    }

    /// with_udp_idle_timeout overrides the UDP association idle bound
    pub fn with_udp_idle_timeout(mut self, timeout: Duration) -> Self {
        self.udp_idle_timeout = timeout;
        self
    }

    /// bind to the listen address, panics when called twice
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_some() {
            panic!("bind can only be called once");
        }

        let listener = TcpListener::bind(&self.listen_addr).await?;
        let addr = listener.local_addr()?;

        info!("SOCKS5 proxy listening on {addr}");

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run handles server spinup and listens for incoming connections
    /// until the listener fails fatally. Each accepted connection runs
    /// in its own task; a connection's failure never affects the loop
    /// or other sessions.
    pub async fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let listener = self.listener.take().unwrap();

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Transient accept errors do not stop the server
                    warn!("failed to accept connection: {e}");
                    continue;
                }
            };

            let authenticator = self.authenticator.clone();
            let bind_timeout = self.bind_timeout;
            let udp_idle_timeout = self.udp_idle_timeout;

            tokio::spawn(async move {
                info!("new client: {peer_addr}");

                if let Err(e) =
                    handle_connection(stream, authenticator, bind_timeout, udp_idle_timeout).await
                {
                    error!("connection {peer_addr} closed with error: {e:#}");
                }
            });
        }
    }
}

/// handle_connection runs the full per-session pipeline: handshake and
/// authentication, request parsing, command execution, relay
async fn handle_connection(
    mut stream: TcpStream,
    authenticator: Authenticator,
    bind_timeout: Duration,
    udp_idle_timeout: Duration,
) -> Result<()> {
    let identity = negotiate_auth(&mut stream, &authenticator).await?;

    if let Some(username) = &identity {
        info!("client authenticated as {username}");
    }

    commands::handle_request(&mut stream, bind_timeout, udp_idle_timeout).await
}
