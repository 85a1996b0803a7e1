//! Persistent token storage.
//!
//! Tokens are stored as SHA-256 hashes in a pretty-printed JSON file; the
//! plaintext exists only in the response that minted it. All reads and
//! writes take an exclusive advisory lock on a sibling `.lock` file so the
//! server and admin tooling can share the store, and writes go through a
//! temp file plus rename.

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default expiration for non-admin tokens.
pub const DEFAULT_TOKEN_EXPIRY_DAYS: i64 = 30;

/// v2 = hashed tokens. Older stores are migrated destructively: hashes are
/// one-way, so plaintext-era tokens cannot be carried forward.
pub const CURRENT_STORE_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("token store schema: {0}")]
    Schema(#[from] serde_json::Error),
}

/// SHA-256 of the plaintext, hex-encoded.
pub fn hash_token(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// A persisted token record. `token` is the hash, never the plaintext;
/// `token_id` is a short non-secret identifier for admin operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    pub client_name: String,
    pub created_at: String,
    pub is_admin: bool,
    pub is_revoked: bool,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub token_id: String,
}

impl StoredToken {
    /// Mint a new token. Admin tokens never expire by default; others get
    /// 30 days. `expiry_days <= 0` means no expiration.
    pub fn create(
        client_name: &str,
        is_admin: bool,
        expiry_days: Option<i64>,
    ) -> (StoredToken, String) {
        let now = Utc::now();
        let expires_at = match expiry_days {
            None if is_admin => None,
            None => Some((now + Duration::days(DEFAULT_TOKEN_EXPIRY_DAYS)).to_rfc3339()),
            Some(days) if days <= 0 => None,
            Some(days) => Some((now + Duration::days(days)).to_rfc3339()),
        };

        let plaintext = random_hex(32);
        let stored = StoredToken {
            token: hash_token(&plaintext),
            client_name: client_name.to_string(),
            created_at: now.to_rfc3339(),
            is_admin,
            is_revoked: false,
            expires_at,
            token_id: random_hex(16),
        };
        (stored, plaintext)
    }

    pub fn is_expired(&self) -> bool {
        match &self.expires_at {
            None => false,
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|expiry| Utc::now() > expiry)
                .unwrap_or(false),
        }
    }

    /// Masked hash for token listings: first 8 and last 4 hex chars.
    pub fn masked(&self) -> String {
        if self.token.len() < 12 {
            return "...".to_string();
        }
        format!(
            "{}...{}",
            &self.token[..8],
            &self.token[self.token.len() - 4..]
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    secret_key: String,
    tokens: Vec<StoredToken>,
}

/// File-backed token store. Cheap to clone paths around; every operation
/// re-reads the file under the lock, so concurrent processes stay coherent.
#[derive(Debug, Clone)]
pub struct TokenStore {
    store_path: PathBuf,
    lock_path: PathBuf,
}

impl TokenStore {
    /// Open (or create) the store. When a fresh store is initialized, or an
    /// old-version store is migrated, the returned plaintext is the newly
    /// minted admin token; the caller must show it to the operator exactly
    /// once.
    pub fn open(store_path: impl Into<PathBuf>) -> Result<(TokenStore, Option<String>), StoreError> {
        let store_path = store_path.into();
        let lock_path = store_path.with_extension("lock");
        if let Some(parent) = store_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let store = TokenStore {
            store_path,
            lock_path,
        };

        if !store.store_path.exists() {
            let plaintext = store.initialize()?;
            return Ok((store, Some(plaintext)));
        }
        let migrated = store.migrate_if_needed()?;
        Ok((store, migrated))
    }

    pub fn path(&self) -> &Path {
        &self.store_path
    }

    fn lock(&self) -> Result<File, StoreError> {
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        lock_file.lock_exclusive()?;
        Ok(lock_file)
    }

    fn read(&self) -> Result<StoreFile, StoreError> {
        let _lock = self.lock()?;
        let raw = fs::read(&self.store_path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn write(&self, data: &StoreFile) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let tmp_path = self.store_path.with_extension("tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(data)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
        }
        fs::rename(&tmp_path, &self.store_path)?;
        Ok(())
    }

    fn initialize(&self) -> Result<String, StoreError> {
        let (admin, plaintext) = StoredToken::create("admin", true, None);
        let data = StoreFile {
            version: CURRENT_STORE_VERSION,
            secret_key: random_hex(32),
            tokens: vec![admin],
        };
        self.write(&data)?;
        info!(path = %self.store_path.display(), "token store initialized with admin token");
        Ok(plaintext)
    }

    /// One-way version migration. Hashed storage cannot recover plaintext,
    /// so every pre-v2 token is discarded and a fresh admin token minted.
    fn migrate_if_needed(&self) -> Result<Option<String>, StoreError> {
        let mut data = self.read()?;
        if data.version >= CURRENT_STORE_VERSION {
            return Ok(None);
        }

        let discarded = data.tokens.len();
        warn!(
            from_version = data.version,
            discarded, "migrating token store to hashed storage; all existing tokens are invalid"
        );
        let (admin, plaintext) = StoredToken::create("admin", true, None);
        data.tokens = vec![admin];
        data.version = CURRENT_STORE_VERSION;
        self.write(&data)?;
        Ok(Some(plaintext))
    }

    pub fn secret_key(&self) -> Result<String, StoreError> {
        Ok(self.read()?.secret_key)
    }

    /// Validate a plaintext token: present, not revoked, not expired.
    pub fn validate(&self, plaintext: &str) -> Result<Option<StoredToken>, StoreError> {
        let data = self.read()?;
        let token_hash = hash_token(plaintext);
        for stored in data.tokens {
            if stored.token != token_hash {
                continue;
            }
            if stored.is_revoked {
                warn!(client = %stored.client_name, "token is revoked");
                return Ok(None);
            }
            if stored.is_expired() {
                warn!(client = %stored.client_name, "token has expired");
                return Ok(None);
            }
            debug!(client = %stored.client_name, "token validated");
            return Ok(Some(stored));
        }
        warn!("token validation failed: not found");
        Ok(None)
    }

    pub fn is_admin(&self, plaintext: &str) -> Result<bool, StoreError> {
        Ok(self.validate(plaintext)?.map(|t| t.is_admin).unwrap_or(false))
    }

    pub fn generate(
        &self,
        client_name: &str,
        is_admin: bool,
        expiry_days: Option<i64>,
    ) -> Result<(StoredToken, String), StoreError> {
        let mut data = self.read()?;
        let (stored, plaintext) = StoredToken::create(client_name, is_admin, expiry_days);
        data.tokens.push(stored.clone());
        self.write(&data)?;
        info!(
            client = %client_name,
            is_admin,
            expires_at = stored.expires_at.as_deref().unwrap_or("never"),
            "generated token"
        );
        Ok((stored, plaintext))
    }

    pub fn revoke(&self, plaintext: &str) -> Result<bool, StoreError> {
        let token_hash = hash_token(plaintext);
        self.revoke_where(|t| t.token == token_hash)
    }

    pub fn revoke_by_id(&self, token_id: &str) -> Result<bool, StoreError> {
        self.revoke_where(|t| t.token_id == token_id)
    }

    fn revoke_where(&self, matches: impl Fn(&StoredToken) -> bool) -> Result<bool, StoreError> {
        let mut data = self.read()?;
        for stored in &mut data.tokens {
            if matches(stored) {
                stored.is_revoked = true;
                let client = stored.client_name.clone();
                self.write(&data)?;
                info!(client = %client, "token revoked");
                return Ok(true);
            }
        }
        warn!("cannot revoke token: not found");
        Ok(false)
    }

    /// Permanently remove a record by stored hash.
    pub fn delete_by_hash(&self, token_hash: &str) -> Result<bool, StoreError> {
        let mut data = self.read()?;
        let before = data.tokens.len();
        data.tokens.retain(|t| t.token != token_hash);
        if data.tokens.len() == before {
            return Ok(false);
        }
        self.write(&data)?;
        Ok(true)
    }

    pub fn get_by_id(&self, token_id: &str) -> Result<Option<StoredToken>, StoreError> {
        Ok(self.read()?.tokens.into_iter().find(|t| t.token_id == token_id))
    }

    pub fn get_by_client_name(&self, client_name: &str) -> Result<Option<StoredToken>, StoreError> {
        Ok(self
            .read()?
            .tokens
            .into_iter()
            .find(|t| t.client_name == client_name))
    }

    pub fn list(&self) -> Result<Vec<StoredToken>, StoreError> {
        Ok(self.read()?.tokens)
    }

    pub fn active_tokens(&self) -> Result<Vec<StoredToken>, StoreError> {
        Ok(self
            .read()?
            .tokens
            .into_iter()
            .filter(|t| !t.is_revoked)
            .collect())
    }
}
