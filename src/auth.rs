//! SOCKS5 authentication negotiation
//!
//! Handles the method-selection handshake (RFC 1928) and the
//! username/password sub-negotiation (RFC 1929). The server advertises
//! exactly one method, chosen at startup: no-auth when the credential
//! store is empty, username/password otherwise.

use crate::protocol::{AUTH_VERSION, AuthMethod, AuthStatus, Version};
use anyhow::{Result, bail};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// CredentialStore is an in-memory username -> password mapping used
/// for username/password authentication. Lookups are exact-match only;
/// any duplicate-username policy belongs to the loading layer.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: HashMap<String, String>,
}

/// CredentialStore implementation block
impl CredentialStore {
    /// new creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// insert adds or replaces a credential; last write survives
    pub fn insert(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.users.insert(username.into(), password.into());
    }

    /// contains reports whether the username exists in the store
    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    /// verify checks a username/password pair; the attempt succeeds only
    /// if the username exists and the stored password matches exactly
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.users.get(username).map(String::as_str) == Some(password)
    }

    /// is_empty reports whether the store has no credentials
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// len returns the number of configured credentials
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// usernames iterates over the configured usernames
    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }
}

impl FromIterator<(String, String)> for CredentialStore {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            users: iter.into_iter().collect(),
        }
    }
}

/// Authenticator is the closed set of authentication variants the
/// server can be configured with
#[derive(Debug, Clone)]
pub enum Authenticator {
    /// No authentication; every session is accepted as-is
    NoAuth,
    /// RFC 1929 username/password against the credential store
    UserPass(Arc<CredentialStore>),
}

/// Authenticator implementation block
impl Authenticator {
    /// from_store selects the variant for the given store: no-auth when
    /// empty, username/password otherwise
    pub fn from_store(store: CredentialStore) -> Self {
        if store.is_empty() {
            Authenticator::NoAuth
        } else {
            Authenticator::UserPass(Arc::new(store))
        }
    }

    /// method returns the single auth method this variant advertises
    pub fn method(&self) -> AuthMethod {
        match self {
            Authenticator::NoAuth => AuthMethod::NoAuth,
            Authenticator::UserPass(_) => AuthMethod::UserPass,
        }
    }

    /// attempt runs this variant's sub-protocol on the stream, returning
    /// the authenticated username (if any) on success
    pub async fn attempt<S>(&self, stream: &mut S) -> Result<Option<String>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self {
            Authenticator::NoAuth => Ok(None),
            Authenticator::UserPass(store) => {
                let username = authenticate_userpass(stream, store).await?;
                Ok(Some(username))
            }
        }
    }
}

/// negotiate_auth handles the full authentication flow: read the client
/// greeting, select a method, reply, and run the selected method's
/// sub-protocol. Returns the authenticated username (if any).
pub async fn negotiate_auth<S>(
    stream: &mut S,
    authenticator: &Authenticator,
) -> Result<Option<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // ClientHello format
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+

    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    let version = buf[0];
    let n_methods = buf[1];

    // A non-SOCKS5 greeting closes the connection with no reply bytes
    if version != Version::SOCKS5 as u8 {
        bail!("unsupported SOCKS version: {version}");
    }

    let mut methods = vec![0u8; n_methods as usize];
    stream.read_exact(&mut methods).await?;

    // ServerChoice method selection reply format
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+

    let method = authenticator.method();
    if !methods.contains(&(method as u8)) {
        stream
            .write_all(&[Version::SOCKS5 as u8, AuthMethod::NoAcceptable as u8])
            .await?;
        bail!("no acceptable authentication method offered");
    }

    stream
        .write_all(&[Version::SOCKS5 as u8, method as u8])
        .await?;

    authenticator.attempt(stream).await
}

/// authenticate_userpass handles username/password authentication
/// according to RFC 1929, returning the authenticated username
async fn authenticate_userpass<S>(stream: &mut S, store: &CredentialStore) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Client Username/Password Request
    // +----+------+----------+------+----------+
    // |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    // +----+------+----------+------+----------+
    // | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    // +----+------+----------+------+----------+

    let mut ver = [0u8; 1];
    stream.read_exact(&mut ver).await?;

    if ver[0] != AUTH_VERSION {
        bail!(
            "invalid username/password sub-negotiation version: {}",
            ver[0]
        );
    }

    let mut username_len = [0u8; 1];
    stream.read_exact(&mut username_len).await?;
    let mut username = vec![0u8; username_len[0] as usize];
    stream.read_exact(&mut username).await?;

    let mut password_len = [0u8; 1];
    stream.read_exact(&mut password_len).await?;
    let mut password = vec![0u8; password_len[0] as usize];
    stream.read_exact(&mut password).await?;

    // Non-UTF-8 credentials can never match a stored entry
    let verified = match (str::from_utf8(&username), str::from_utf8(&password)) {
        (Ok(user), Ok(pass)) => store.verify(user, pass),
        _ => false,
    };

    let status = if verified {
        AuthStatus::Success
    } else {
        AuthStatus::Failure
    };

    // Username/Password Server response
    // +----+--------+
    // |VER | STATUS |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+

    stream.write_all(&[AUTH_VERSION, status as u8]).await?;

    match status {
        AuthStatus::Success => Ok(String::from_utf8(username)?),
        AuthStatus::Failure => bail!("authentication failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(entries: &[(&str, &str)]) -> CredentialStore {
        let mut store = CredentialStore::new();
        for (user, pass) in entries {
            store.insert(*user, *pass);
        }
        store
    }

    fn userpass_request(user: &str, pass: &str) -> Vec<u8> {
        let mut req = vec![AUTH_VERSION, user.len() as u8];
        req.extend_from_slice(user.as_bytes());
        req.push(pass.len() as u8);
        req.extend_from_slice(pass.as_bytes());
        req
    }

    #[test]
    fn test_store_verify_exact_match_only() {
        let store = store_with(&[("alice", "secret")]);
        assert!(store.verify("alice", "secret"));
        assert!(!store.verify("alice", "wrong"));
        assert!(!store.verify("alice", "secre"));
        assert!(!store.verify("bob", "x"));
    }

    #[test]
    fn test_store_last_write_survives() {
        let mut store = store_with(&[("alice", "one")]);
        store.insert("alice", "two");
        assert_eq!(store.len(), 1);
        assert!(store.verify("alice", "two"));
        assert!(!store.verify("alice", "one"));
    }

    #[test]
    fn test_authenticator_policy_from_store() {
        assert_eq!(
            Authenticator::from_store(CredentialStore::new()).method(),
            AuthMethod::NoAuth
        );
        assert_eq!(
            Authenticator::from_store(store_with(&[("a", "b")])).method(),
            AuthMethod::UserPass
        );
    }

    #[tokio::test]
    async fn test_negotiate_no_auth() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();

        let identity = negotiate_auth(&mut server, &Authenticator::NoAuth)
            .await
            .unwrap();
        assert_eq!(identity, None);

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_negotiate_rejects_wrong_version() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

        let result = negotiate_auth(&mut server, &Authenticator::NoAuth).await;
        assert!(result.is_err());

        // No reply bytes were written before the failure
        drop(server);
        let mut leftover = Vec::new();
        client.read_to_end(&mut leftover).await.unwrap();
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn test_negotiate_no_acceptable_method() {
        let authenticator = Authenticator::from_store(store_with(&[("alice", "secret")]));

        // Client only offers no-auth against a server requiring user/pass
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();

        let result = negotiate_auth(&mut server, &authenticator).await;
        assert!(result.is_err());

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0xFF]);
    }

    #[tokio::test]
    async fn test_userpass_success() {
        let authenticator = Authenticator::from_store(store_with(&[("alice", "secret")]));

        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&[0x05, 0x02, 0x00, 0x02]).await.unwrap();
        client
            .write_all(&userpass_request("alice", "secret"))
            .await
            .unwrap();

        let identity = negotiate_auth(&mut server, &authenticator).await.unwrap();
        assert_eq!(identity.as_deref(), Some("alice"));

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x02, 0x01, 0x00]);
    }

    #[tokio::test]
    async fn test_userpass_wrong_password() {
        let authenticator = Authenticator::from_store(store_with(&[("alice", "secret")]));

        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        client
            .write_all(&userpass_request("alice", "wrong"))
            .await
            .unwrap();

        let result = negotiate_auth(&mut server, &authenticator).await;
        assert!(result.is_err());

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply[2..], &[0x01, 0x01]);
    }

    #[tokio::test]
    async fn test_userpass_unknown_user() {
        let authenticator = Authenticator::from_store(store_with(&[("alice", "secret")]));

        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        client
            .write_all(&userpass_request("bob", "x"))
            .await
            .unwrap();

        assert!(negotiate_auth(&mut server, &authenticator).await.is_err());

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[3], 0x01);
    }

    #[tokio::test]
    async fn test_userpass_bad_subnegotiation_version() {
        let authenticator = Authenticator::from_store(store_with(&[("alice", "secret")]));

        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        client.write_all(&[0x02, 0x05]).await.unwrap(); // bad sub-negotiation version

        assert!(negotiate_auth(&mut server, &authenticator).await.is_err());
    }
}
