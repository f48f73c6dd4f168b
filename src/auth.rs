// Sender authorization
// (c) 2024 Ross Younger

use std::{collections::HashSet, path::Path};

use anyhow::{Context as _, Result};
use russh_keys::{key::PublicKey, PublicKeyBase64 as _};
use tracing::{debug, warn};

/// Decides whether a sender may open a transfer.
///
/// Implementations must be safe to call concurrently from every connection.
pub trait Authorizer: Send + Sync {
    /// Returns true if `user` presenting `key` may proceed
    fn authorize(&self, user: &str, key: &PublicKey) -> bool;
}

const KEY_TYPE_PREFIXES: &[&str] = &["ssh-", "ecdsa-sha2-", "sk-"];

/// The public keys listed in an OpenSSH `authorized_keys` file.
///
/// Any user name is accepted; only the key matters. Per-key options are ignored.
#[derive(Debug, Clone, Default)]
pub struct AuthorizedKeys {
    keys: HashSet<String>,
}

impl AuthorizedKeys {
    /// Reads an `authorized_keys` file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading authorized keys from {}", path.display()))?;
        let keys = Self::parse(&text).with_context(|| format!("in {}", path.display()))?;
        debug!("loaded {} authorized key(s) from {}", keys.len(), path.display());
        Ok(keys)
    }

    /// Parses `authorized_keys` content. Unparseable lines are skipped with a warning.
    pub fn parse(text: &str) -> Result<Self> {
        let mut keys = HashSet::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let Some(_key_type) = tokens
                .by_ref()
                .find(|t| KEY_TYPE_PREFIXES.iter().any(|p| t.starts_with(p)))
            else {
                warn!("authorized keys line {}: no key type found", lineno + 1);
                continue;
            };
            let Some(blob) = tokens.next() else {
                warn!("authorized keys line {}: key data missing", lineno + 1);
                continue;
            };
            match russh_keys::parse_public_key_base64(blob) {
                Ok(key) => {
                    let _ = keys.insert(key.public_key_base64());
                }
                Err(e) => warn!("authorized keys line {}: {e}", lineno + 1),
            }
        }
        anyhow::ensure!(!keys.is_empty(), "no usable authorized keys");
        Ok(Self { keys })
    }

    /// Number of distinct keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Authorizer for AuthorizedKeys {
    fn authorize(&self, user: &str, key: &PublicKey) -> bool {
        let ok = self.keys.contains(&key.public_key_base64());
        debug!(
            "key {} for user {user}: {}",
            key.fingerprint(),
            if ok { "accepted" } else { "rejected" }
        );
        ok
    }
}
