use anyhow::{Context, Result, bail};
use clap::Parser;
use socks5d::{CredentialStore, Socks5Server};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "A standalone SOCKS5 proxy server", long_about = None)]
struct Args {
    /// Listener address
    #[arg(short, long, default_value = "0.0.0.0:1080")]
    listen: String,

    /// Path to a users file of username:password lines
    #[arg(long)]
    users: Option<PathBuf>,

    /// User credentials in format username:password (can be used multiple times)
    #[arg(short, long)]
    user: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt::init();

    // Parse args
    let args = Args::parse();

    let mut store = CredentialStore::new();

    // Load credentials from file if provided
    if let Some(path) = &args.users {
        load_users_file(&mut store, path);
    }

    // Add users from --user flags; malformed values are fatal
    for user_flag in &args.user {
        let Some((username, password)) = user_flag.split_once(':') else {
            bail!("invalid user format: {user_flag} (expected username:password)");
        };
        add_user(&mut store, username, password);
    }

    log_configured_users(&store);

    let mut server = Socks5Server::new(args.listen).with_credentials(store);
    server.run().await
}

/// add_user inserts a credential, applying the duplicate-username
/// policy: re-adding the same password is a no-op, while a different
/// password is stored under the first free `name_N` suffix. This is a
/// loading policy only; authentication stays exact-match.
fn add_user(store: &mut CredentialStore, username: &str, password: &str) {
    if !store.contains(username) {
        store.insert(username, password);
        return;
    }

    if store.verify(username, password) {
        return;
    }

    let mut counter = 1;
    loop {
        let key = format!("{username}_{counter}");
        if !store.contains(&key) {
            store.insert(key, password);
            return;
        }
        counter += 1;
    }
}

/// load_users_file reads username:password lines into the store. Blank
/// lines and '#' comments are skipped; malformed lines and a missing
/// file are warnings, not fatal errors.
fn load_users_file(store: &mut CredentialStore, path: &Path) {
    let content = match std::fs::read_to_string(path)
        .with_context(|| format!("could not open users file {}", path.display()))
    {
        Ok(content) => content,
        Err(e) => {
            warn!("{e:#}");
            return;
        }
    };

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match line.split_once(':') {
            Some((username, password)) => add_user(store, username, password),
            None => warn!("invalid auth-pair in {}: {line}", path.display()),
        }
    }
}

/// log_configured_users reports the effective authentication setup at
/// startup; passwords are never logged
fn log_configured_users(store: &CredentialStore) {
    if store.is_empty() {
        info!("no credentials provided - running without authentication");
        return;
    }

    info!(
        "running with authentication - {} credential(s) configured",
        store.len()
    );

    // Group suffix-relabeled duplicates back under their original name
    let mut user_count: HashMap<&str, usize> = HashMap::new();
    for user in store.usernames() {
        let original = match user.rsplit_once('_') {
            Some((base, suffix)) if suffix.chars().all(|c| c.is_ascii_digit()) => base,
            _ => user,
        };
        *user_count.entry(original).or_default() += 1;
    }

    for (user, count) in user_count {
        if count > 1 {
            info!("user: {user} ({count} passwords)");
        } else {
            info!("user: {user}");
        }
    }
}
