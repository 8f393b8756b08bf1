//! Secure Storage Module
//!
//! Keeps the tracker entry on disk, encrypted with DPAPI on Windows.

use std::path::{Path, PathBuf};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, error, debug};

#[cfg(windows)]
use windows::Win32::Security::Cryptography::{
    CryptProtectData, CryptUnprotectData, CRYPTPROTECT_UI_FORBIDDEN, CRYPT_INTEGER_BLOB,
};

/// Directory name under the local data dir
pub const APP_DIR_NAME: &str = "FindMyTracker";

/// Encrypted key/value file store
pub struct SecureStorage {
    storage_path: PathBuf,
}

impl SecureStorage {
    /// Storage under the user's local data directory
    pub fn new() -> Self {
        let storage_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME);

        Self::with_path(storage_path)
    }

    /// Storage rooted at `storage_path`
    pub fn with_path(storage_path: impl Into<PathBuf>) -> Self {
        let storage_path = storage_path.into();

        if let Err(e) = std::fs::create_dir_all(&storage_path) {
            error!("Failed to create storage directory: {}", e);
        }

        debug!("Secure storage initialized at: {:?}", storage_path);

        Self { storage_path }
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    /// Encrypt and write `data` under `key`
    pub fn save<T: Serialize>(&self, key: &str, data: &T) -> Result<(), StorageError> {
        let json = serde_json::to_vec(data)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let encrypted = protect(&json)?;

        // Write then rename so a crash never leaves a torn entry behind.
        let file_path = self.file_path(key);
        let tmp_path = file_path.with_extension("dat.tmp");
        std::fs::write(&tmp_path, encrypted)
            .and_then(|_| std::fs::rename(&tmp_path, &file_path))
            .map_err(|e| StorageError::Io(e.to_string()))?;

        info!("Saved encrypted data for key: {}", key);
        Ok(())
    }

    /// Read and decrypt the value under `key`
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<T, StorageError> {
        let file_path = self.file_path(key);

        let encrypted = match std::fs::read(&file_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };

        let decrypted = unprotect(&encrypted)?;

        serde_json::from_slice(&decrypted)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Remove the value under `key`, if any
    pub fn delete(&self, key: &str) -> Result<(), StorageError> {
        let file_path = self.file_path(key);

        if file_path.exists() {
            std::fs::remove_file(&file_path)
                .map_err(|e| StorageError::Io(e.to_string()))?;
            info!("Deleted stored data for key: {}", key);
        }

        Ok(())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.file_path(key).exists()
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.storage_path.join(format!("{}.dat", key))
    }
}

impl Default for SecureStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
fn protect(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let input = CRYPT_INTEGER_BLOB {
        cbData: data.len() as u32,
        pbData: data.as_ptr() as *mut u8,
    };
    let mut output = CRYPT_INTEGER_BLOB::default();

    unsafe {
        CryptProtectData(&input, None, None, None, None, CRYPTPROTECT_UI_FORBIDDEN, &mut output)
            .map_err(|e| StorageError::Encryption(e.to_string()))?;

        Ok(take_blob(output))
    }
}

#[cfg(windows)]
fn unprotect(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let input = CRYPT_INTEGER_BLOB {
        cbData: data.len() as u32,
        pbData: data.as_ptr() as *mut u8,
    };
    let mut output = CRYPT_INTEGER_BLOB::default();

    unsafe {
        CryptUnprotectData(&input, None, None, None, None, CRYPTPROTECT_UI_FORBIDDEN, &mut output)
            .map_err(|e| StorageError::Decryption(e.to_string()))?;

        Ok(take_blob(output))
    }
}

/// Copy out a DPAPI-allocated blob and free it.
///
/// # Safety
/// `blob` must come from a successful DPAPI call.
#[cfg(windows)]
unsafe fn take_blob(blob: CRYPT_INTEGER_BLOB) -> Vec<u8> {
    let bytes = std::slice::from_raw_parts(blob.pbData, blob.cbData as usize).to_vec();

    windows::Win32::Foundation::LocalFree(
        windows::Win32::Foundation::HLOCAL(blob.pbData as *mut std::ffi::c_void)
    );

    bytes
}

// Plain files off Windows; the data dir is user-private.
#[cfg(not(windows))]
fn protect(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    Ok(data.to_vec())
}

#[cfg(not(windows))]
fn unprotect(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    Ok(data.to_vec())
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("No stored data for key: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        url: String,
        count: u32,
    }

    #[test]
    fn save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::with_path(dir.path());
        let entry = Entry { url: "http://localhost:6969".into(), count: 3 };
        assert_eq!(storage.path(), dir.path());

        storage.save("entry", &entry).unwrap();
        assert!(storage.exists("entry"));
        assert_eq!(storage.load::<Entry>("entry").unwrap(), entry);

        storage.delete("entry").unwrap();
        assert!(!storage.exists("entry"));
    }

    #[test]
    fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::with_path(dir.path().join("nested"));

        let err = storage.load::<Entry>("entry").unwrap_err();

        assert!(matches!(err, StorageError::NotFound(key) if key == "entry"));
        assert!(storage.delete("entry").is_ok());
    }

    #[test]
    fn overwrite_replaces_entry() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::with_path(dir.path());

        storage.save("entry", &Entry { url: "a".into(), count: 1 }).unwrap();
        storage.save("entry", &Entry { url: "b".into(), count: 2 }).unwrap();

        assert_eq!(storage.load::<Entry>("entry").unwrap().url, "b");
        assert!(!dir.path().join("entry.dat.tmp").exists());
    }
}
