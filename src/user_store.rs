//! Credential lookup. The core never stores credentials itself; it consults
//! whatever `UserStore` implementation it is configured with.

use std::collections::HashMap;

use async_trait::async_trait;
use md5::{Digest, Md5};

use crate::errors::UserStoreError;

/// A user's authorization record as retrieved from the store. Never mutated
/// by the core; dropped when the owning session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub username: String,
    /// 16-byte MD5 digest, lower-hex encoded — matches the admin API's
    /// `HashPassword` scheme so records remain compatible with it.
    pub password_hash: String,
    pub max_concurrent: u32,
}

impl CredentialRecord {
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>, max_concurrent: u32) -> Self {
        CredentialRecord {
            username: username.into(),
            password_hash: password_hash.into(),
            max_concurrent,
        }
    }

    /// Builds a record from a plaintext password, hashing it the way the
    /// admin API does at user-creation time.
    pub fn from_plaintext(username: impl Into<String>, password: &str, max_concurrent: u32) -> Self {
        CredentialRecord::new(username, hash_password(password.as_bytes()), max_concurrent)
    }

    /// Byte-for-byte comparison of the transmitted password's MD5 hex digest
    /// against the stored digest. Takes raw bytes since RFC 1929 passwords
    /// are opaque on the wire, not guaranteed UTF-8.
    pub fn verify(&self, password: &[u8]) -> bool {
        self.password_hash == hash_password(password)
    }
}

/// MD5 hex digest of a password's raw bytes. Cryptographically inadequate
/// for new deployments (spec.md §9) but required for compatibility with
/// existing stored credentials.
pub fn hash_password(password: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(password);
    hex::encode(hasher.finalize())
}

/// Looks up a `CredentialRecord` by username. Implementations are expected
/// to be safe to call concurrently from many sessions at once.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn lookup(&self, username: &str) -> Result<CredentialRecord, UserStoreError>;
}

/// An in-memory `UserStore` seeded once from configuration. Standalone
/// replacement for the external SQL-backed store the admin API writes to;
/// the map is immutable after construction so no internal locking is
/// needed.
pub struct StaticUserStore {
    users: HashMap<String, CredentialRecord>,
}

impl StaticUserStore {
    pub fn new(records: impl IntoIterator<Item = CredentialRecord>) -> Self {
        let users = records
            .into_iter()
            .map(|r| (r.username.clone(), r))
            .collect();
        StaticUserStore { users }
    }
}

#[async_trait]
impl UserStore for StaticUserStore {
    async fn lookup(&self, username: &str) -> Result<CredentialRecord, UserStoreError> {
        self.users
            .get(username)
            .cloned()
            .ok_or(UserStoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_matches_md5_hex() {
        let record = CredentialRecord::from_plaintext("user", "password", 4);
        assert!(record.verify(b"password"));
        assert!(!record.verify(b"wrong"));
    }

    #[test]
    fn verify_preserves_non_utf8_password_bytes() {
        let hash = hash_password(&[0xff, 0x00, 0xfe]);
        let record = CredentialRecord::new("user", hash, 1);
        assert!(record.verify(&[0xff, 0x00, 0xfe]));
    }

    #[tokio::test]
    async fn static_store_looks_up_seeded_users() {
        let store = StaticUserStore::new([CredentialRecord::from_plaintext("user", "password", 4)]);
        let record = store.lookup("user").await.unwrap();
        assert_eq!(record.max_concurrent, 4);
        assert!(matches!(
            store.lookup("nobody").await.unwrap_err(),
            UserStoreError::NotFound
        ));
    }
}
