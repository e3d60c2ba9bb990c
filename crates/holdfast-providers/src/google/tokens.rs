//! OAuth token storage.
//!
//! Tokens live in memory and are optionally mirrored to a JSON file, written
//! atomically with restrictive permissions.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{Duration, Utc};
use holdfast_core::CredentialBundle;
use tracing::{debug, info};

use crate::error::{AdapterError, AdapterResult};

/// Token storage with an optional file backend.
#[derive(Debug)]
pub struct TokenStorage {
    /// Path to the token file, if persisted.
    path: Option<PathBuf>,

    /// In-memory copy of the current tokens.
    tokens: RwLock<Option<CredentialBundle>>,
}

impl TokenStorage {
    /// Creates a storage that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tokens: RwLock::new(None),
        }
    }

    /// Creates a storage mirrored to the given file.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            tokens: RwLock::new(None),
        }
    }

    /// Loads tokens from disk into memory.
    ///
    /// Returns Ok(true) if tokens were loaded, Ok(false) if no tokens exist.
    pub fn load(&self) -> AdapterResult<bool> {
        let Some(path) = self.path.as_ref() else {
            return Ok(false);
        };
        if !path.exists() {
            debug!("no token file at {:?}", path);
            return Ok(false);
        }

        let content = fs::read_to_string(path).map_err(|e| {
            AdapterError::configuration(format!("failed to read token file: {}", e)).with_source(e)
        })?;

        let tokens: CredentialBundle = serde_json::from_str(&content).map_err(|e| {
            AdapterError::configuration(format!("failed to parse token file: {}", e))
        })?;

        info!("loaded tokens from {:?}", path);
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = Some(tokens);
        Ok(true)
    }

    /// Saves the current tokens to disk, if a file is configured.
    fn save(&self) -> AdapterResult<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let Some(tokens) = self.get() else {
            return Err(AdapterError::internal("no tokens to save"));
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AdapterError::configuration(format!("failed to create token directory: {}", e))
            })?;
        }

        // Write to temp file first, then rename for atomicity
        let temp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&tokens)
            .map_err(|e| AdapterError::internal(format!("failed to serialize tokens: {}", e)))?;

        fs::write(&temp_path, &content).map_err(|e| {
            AdapterError::configuration(format!("failed to write token file: {}", e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            let _ = fs::set_permissions(&temp_path, perms);
        }

        fs::rename(&temp_path, path).map_err(|e| {
            AdapterError::configuration(format!("failed to rename token file: {}", e))
        })?;

        debug!("saved tokens to {:?}", path);
        Ok(())
    }

    /// Returns a clone of the current tokens, if any.
    pub fn get(&self) -> Option<CredentialBundle> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the tokens and persists them.
    pub fn set(&self, tokens: CredentialBundle) -> AdapterResult<()> {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = Some(tokens);
        self.save()
    }

    /// Installs a refreshed access token, keeping the refresh token.
    pub fn update_access_token(
        &self,
        access_token: impl Into<String>,
        expires_in_secs: Option<i64>,
    ) -> AdapterResult<()> {
        {
            let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
            let Some(current) = tokens.as_mut() else {
                return Err(AdapterError::internal("no tokens to update"));
            };
            current.access_token = access_token.into();
            current.expires_at = expires_in_secs.map(|secs| Utc::now() + Duration::seconds(secs));
        }
        self.save()
    }

    /// Returns the current access token.
    pub fn access_token(&self) -> Option<String> {
        self.get().map(|t| t.access_token)
    }

    /// Returns the refresh token, if any.
    pub fn refresh_token(&self) -> Option<String> {
        self.get().and_then(|t| t.refresh_token)
    }

    /// Returns true if tokens are loaded and not expired.
    pub fn has_valid_tokens(&self) -> bool {
        self.get().is_some_and(|t| !t.is_expired())
    }

    /// Returns the token storage path.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> CredentialBundle {
        CredentialBundle::new(
            "access-token",
            Some("refresh-token".to_string()),
            Some(Utc::now() + Duration::hours(1)),
        )
    }

    #[test]
    fn in_memory_storage_never_writes() {
        let storage = TokenStorage::in_memory();
        assert!(!storage.load().unwrap());
        storage.set(bundle()).unwrap();
        assert!(storage.path().is_none());
        assert_eq!(storage.access_token().as_deref(), Some("access-token"));
        assert!(storage.has_valid_tokens());
    }

    #[test]
    fn file_storage_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens").join("work.json");
        let storage = TokenStorage::with_file(&path);
        storage.set(bundle()).unwrap();
        assert!(path.exists());

        let reloaded = TokenStorage::with_file(&path);
        assert!(reloaded.load().unwrap());
        assert_eq!(reloaded.refresh_token().as_deref(), Some("refresh-token"));
    }

    #[cfg(unix)]
    #[test]
    fn file_storage_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        TokenStorage::with_file(&path).set(bundle()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn update_access_token_keeps_refresh_token() {
        let storage = TokenStorage::in_memory();
        storage
            .set(CredentialBundle::new("old", Some("refresh".to_string()), None))
            .unwrap();
        storage.update_access_token("new", Some(3600)).unwrap();

        let tokens = storage.get().unwrap();
        assert_eq!(tokens.access_token, "new");
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh"));
        assert!(tokens.expires_at.is_some());
    }

    #[test]
    fn update_without_tokens_fails() {
        let storage = TokenStorage::in_memory();
        assert!(storage.update_access_token("new", None).is_err());
    }
}
