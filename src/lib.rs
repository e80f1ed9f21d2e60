//! A standalone SOCKS5 proxy server library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT, BIND, and UDP ASSOCIATE commands
//!     - No Authentication
//!     - Username/Password Authentication against a credential store
//!     - IPv4, IPv6, and domain name destinations
//!     - Async using tokio, one task per connection
//!     - Bounded BIND accept and UDP association idle timeouts
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)
//!
//! The server advertises exactly one authentication method, selected
//! from the credential store at startup: no-auth when the store is
//! empty, username/password otherwise.
//!
//! # Example
//! ```no_run
//! use socks5d::{CredentialStore, Socks5Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut users = CredentialStore::new();
//!     users.insert("alice", "secret");
//!
//!     let mut server = Socks5Server::new("127.0.0.1:1080").with_credentials(users);
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod auth;
pub mod commands;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod udp;

// Re-export main types at crate root for convenience
pub use address::Address;
pub use auth::{Authenticator, CredentialStore};
pub use protocol::{AddressType, AuthMethod, Command, ReplyCode, Version};
pub use server::Socks5Server;
