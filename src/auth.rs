//! Persisted login state.
//!
//! A `{token, profile}` blob kept as a JSON file in the data directory so a
//! restart lands the customer back in a logged-in session. The cached
//! profile is only a starting point: the service resyncs it against
//! `/api/auth/me` on startup because the server is authoritative for balance.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::client::Profile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthBlob {
    pub token: String,
    pub profile: Profile,
}

#[derive(Debug, Clone)]
pub struct AuthStore {
    path: PathBuf,
}

impl AuthStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read the persisted blob, `None` when no session was saved.
    pub fn load(&self) -> Result<Option<AuthBlob>, AuthStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        let blob = serde_json::from_str(&contents)?;
        Ok(Some(blob))
    }

    pub fn save(&self, blob: &AuthBlob) -> Result<(), AuthStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(blob)?;
        fs::write(&self.path, contents)?;
        log::debug!("💾 Auth blob saved to {}", self.path.display());
        Ok(())
    }

    /// Remove the persisted session (logout).
    pub fn clear(&self) -> Result<(), AuthStoreError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> Profile {
        Profile {
            full_name: "Nguyen Van A".to_string(),
            phone: "0900000000".to_string(),
            email: "a@example.com".to_string(),
            balance: 50_000_000,
        }
    }

    #[test]
    fn test_save_load_clear_roundtrip() {
        let path = std::env::temp_dir().join("tuition-client-auth-test.json");
        let store = AuthStore::new(path.clone());
        let _ = store.clear();

        assert!(store.load().unwrap().is_none());

        let blob = AuthBlob {
            token: "jwt-token".to_string(),
            profile: sample_profile(),
        };
        store.save(&blob).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.token, "jwt-token");
        assert_eq!(loaded.profile.balance, 50_000_000);

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        fs::remove_file(&path).ok();
    }
}
