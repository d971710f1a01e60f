use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::core::store::RemoteStore;
use crate::utils::{log_reputation_event, ProtectionError, ProtectionResult};

const BLACKLIST_PREFIX: &str = "blacklist:";
const WHITELIST_PREFIX: &str = "whitelist:";

/// How a reputation entry came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    /// Added by an operator through the management API or config
    Manual,
    /// Promoted automatically by rate-limit or alert thresholds
    Auto,
}

#[derive(Debug, Clone)]
struct BlacklistEntry {
    /// Absolute expiry; `None` means permanent
    expires_at: Option<DateTime<Utc>>,
    source: EntrySource,
}

impl BlacklistEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }
}

/// Serializable view of a blacklist entry for the management API.
#[derive(Debug, Clone, Serialize)]
pub struct BlacklistedKey {
    pub key: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub source: EntrySource,
}

/// Per-key blacklist/whitelist with lease semantics and optional mirroring
/// to the remote store.
///
/// The local map answers hot-path lookups; the remote store is consulted on
/// local miss and receives best-effort mirror writes. The whitelist always
/// dominates the blacklist for the same key.
pub struct ReputationStore {
    blacklist: RwLock<HashMap<String, BlacklistEntry>>,
    whitelist: RwLock<HashSet<String>>,
    store: Option<RemoteStore>,
    auto_blacklist_enabled: bool,
    auto_blacklist_threshold: u64,
}

impl ReputationStore {
    pub fn new(
        store: Option<RemoteStore>,
        auto_blacklist_enabled: bool,
        auto_blacklist_threshold: u64,
    ) -> Self {
        Self {
            blacklist: RwLock::new(HashMap::new()),
            whitelist: RwLock::new(HashSet::new()),
            store,
            auto_blacklist_enabled,
            auto_blacklist_threshold,
        }
    }

    fn validate_key(key: &str) -> ProtectionResult<()> {
        if key.trim().is_empty() {
            return Err(ProtectionError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Whether `key` is currently blacklisted. Whitelisted keys are never
    /// blacklisted. Remote failures are treated as "absent" (fail open).
    pub async fn is_blacklisted(&self, key: &str) -> bool {
        if self.is_whitelisted(key).await {
            return false;
        }

        let now = Utc::now();
        let mut expired = false;
        {
            let blacklist = self.blacklist.read();
            if let Some(entry) = blacklist.get(key) {
                if !entry.is_expired(now) {
                    return true;
                }
                expired = true;
            }
        }
        // Lazily evict entries found expired under the read lock.
        if expired {
            self.blacklist.write().remove(key);
        }

        if let Some(store) = &self.store {
            match store.exists(&format!("{BLACKLIST_PREFIX}{key}")).await {
                Ok(found) => return found,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "blacklist lookup failed open");
                }
            }
        }

        false
    }

    /// Whether `key` is whitelisted, consulting the local set first and the
    /// remote store on miss.
    pub async fn is_whitelisted(&self, key: &str) -> bool {
        if self.whitelist.read().contains(key) {
            return true;
        }

        if let Some(store) = &self.store {
            match store.exists(&format!("{WHITELIST_PREFIX}{key}")).await {
                Ok(found) => return found,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "whitelist lookup failed open");
                }
            }
        }

        false
    }

    /// Add `key` to the blacklist for `lease` (or permanently when `None`).
    ///
    /// # Errors
    ///
    /// `ConflictWhitelisted` when the key is whitelisted, `InvalidKey` for an
    /// empty key. Remote mirror failures are logged but do not roll back the
    /// local write.
    pub async fn blacklist(
        &self,
        key: &str,
        lease: Option<Duration>,
        source: EntrySource,
    ) -> ProtectionResult<()> {
        Self::validate_key(key)?;
        if self.is_whitelisted(key).await {
            return Err(ProtectionError::ConflictWhitelisted(key.to_string()));
        }

        let expires_at = lease.map(|lease| {
            Utc::now() + chrono::Duration::milliseconds(lease.as_millis() as i64)
        });
        self.blacklist
            .write()
            .insert(key.to_string(), BlacklistEntry { expires_at, source });
        log_reputation_event("blacklisted", key, None);

        if let Some(store) = &self.store {
            if let Err(err) = store.set_marker(&format!("{BLACKLIST_PREFIX}{key}"), lease).await {
                tracing::warn!(key = %key, error = %err, "blacklist mirror write failed");
            }
        }

        Ok(())
    }

    /// Add `key` to the whitelist. Whitelist entries never expire.
    pub async fn whitelist(&self, key: &str) -> ProtectionResult<()> {
        Self::validate_key(key)?;
        self.whitelist.write().insert(key.to_string());
        log_reputation_event("whitelisted", key, None);

        if let Some(store) = &self.store {
            if let Err(err) = store.set_marker(&format!("{WHITELIST_PREFIX}{key}"), None).await {
                tracing::warn!(key = %key, error = %err, "whitelist mirror write failed");
            }
        }

        Ok(())
    }

    /// Remove `key` from the blacklist.
    pub async fn remove_blacklist(&self, key: &str) -> ProtectionResult<()> {
        self.blacklist.write().remove(key);
        log_reputation_event("blacklist_removed", key, None);

        if let Some(store) = &self.store {
            if let Err(err) = store.delete(&format!("{BLACKLIST_PREFIX}{key}")).await {
                tracing::warn!(key = %key, error = %err, "blacklist mirror delete failed");
            }
        }
        Ok(())
    }

    /// Remove `key` from the whitelist.
    pub async fn remove_whitelist(&self, key: &str) -> ProtectionResult<()> {
        self.whitelist.write().remove(key);
        log_reputation_event("whitelist_removed", key, None);

        if let Some(store) = &self.store {
            if let Err(err) = store.delete(&format!("{WHITELIST_PREFIX}{key}")).await {
                tracing::warn!(key = %key, error = %err, "whitelist mirror delete failed");
            }
        }
        Ok(())
    }

    /// Pure promotion predicate: whether a key with `observed_count` requests
    /// should be auto-blacklisted. The caller performs the write.
    pub async fn should_auto_blacklist(&self, key: &str, observed_count: u64) -> bool {
        if !self.auto_blacklist_enabled {
            return false;
        }
        if self.is_whitelisted(key).await {
            return false;
        }
        observed_count > self.auto_blacklist_threshold
    }

    /// Snapshot of unexpired blacklist entries, local view.
    pub fn list_blacklisted(&self) -> Vec<BlacklistedKey> {
        let now = Utc::now();
        self.blacklist
            .read()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| BlacklistedKey {
                key: key.clone(),
                expires_at: entry.expires_at,
                source: entry.source,
            })
            .collect()
    }

    /// Snapshot of whitelisted keys, local view.
    pub fn list_whitelisted(&self) -> Vec<String> {
        self.whitelist.read().iter().cloned().collect()
    }

    /// Drop expired blacklist entries. Called from the background sweeper.
    pub fn sweep(&self) {
        let now = Utc::now();
        self.blacklist.write().retain(|_, entry| !entry.is_expired(now));
    }
}
