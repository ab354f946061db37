//! Export archive storage and signed download links
//!
//! Archives live on the filesystem under
//! `{root}/{component}/{context}/{area}/{item}/{filename}` with a small JSON
//! sidecar recording size, digest and creation time. Writes are atomic
//! (write to `.tmp`, then rename).

use crate::error::{PrivacyError, StorageError};
use crate::types::{ContextId, RequestId};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

pub const EXPORT_COMPONENT: &str = "privacy_export";
pub const EXPORT_AREA: &str = "export";
pub const EXPORT_FILENAME: &str = "export.zip";

const SIDECAR_SUFFIX: &str = ".meta.json";

/// Storage key of one archive
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveKey {
    pub component: String,
    pub context: ContextId,
    pub area: String,
    pub item: u64,
    pub filename: String,
}

impl ArchiveKey {
    /// Key of the export archive for `request`, stored in the subject's user context.
    pub fn export(user_context: ContextId, request: RequestId) -> Self {
        Self {
            component: EXPORT_COMPONENT.to_string(),
            context: user_context,
            area: EXPORT_AREA.to_string(),
            item: request.as_u64(),
            filename: EXPORT_FILENAME.to_string(),
        }
    }

    pub fn segments(&self) -> [String; 5] {
        [
            self.component.clone(),
            self.context.to_string(),
            self.area.clone(),
            self.item.to_string(),
            self.filename.clone(),
        ]
    }

    fn from_segments(segments: &[&str]) -> Option<Self> {
        match segments {
            [component, context, area, item, filename] => Some(Self {
                component: component.to_string(),
                context: ContextId(context.parse().ok()?),
                area: area.to_string(),
                item: item.parse().ok()?,
                filename: filename.to_string(),
            }),
            _ => None,
        }
    }

    fn is_safe(&self) -> bool {
        [&self.component, &self.area, &self.filename]
            .iter()
            .all(|s| !s.is_empty() && !s.contains(['/', '\\']) && *s != "." && *s != "..")
    }
}

impl std::fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments().join("/"))
    }
}

/// Record of a stored archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArchive {
    pub key: ArchiveKey,
    pub size: u64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Durable blob store for export archives
pub trait ArchiveStore: Send + Sync {
    fn put(&self, key: &ArchiveKey, bytes: &[u8]) -> Result<StoredArchive, StorageError>;

    fn get(&self, key: &ArchiveKey) -> Result<Vec<u8>, StorageError>;

    /// Returns false when nothing was stored under `key`.
    fn delete(&self, key: &ArchiveKey) -> Result<bool, StorageError>;

    fn exists(&self, key: &ArchiveKey) -> Result<bool, StorageError>;

    fn list(&self) -> Result<Vec<StoredArchive>, StorageError>;

    /// Delete every archive created before `cutoff`.
    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<ArchiveKey>, StorageError> {
        let mut purged = Vec::new();
        for archive in self.list()? {
            if archive.created_at < cutoff && self.delete(&archive.key)? {
                purged.push(archive.key);
            }
        }
        Ok(purged)
    }
}

/// Filesystem archive store
pub struct FileArchiveStore {
    root: PathBuf,
}

impl FileArchiveStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to create archive directory at {:?}: {}", root, e),
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &ArchiveKey) -> Result<PathBuf, StorageError> {
        if !key.is_safe() {
            return Err(StorageError::Corrupt {
                key: key.to_string(),
                message: "archive key contains path separators".to_string(),
            });
        }
        let mut path = self.root.clone();
        for segment in key.segments() {
            path.push(segment);
        }
        Ok(path)
    }

    fn sidecar_for(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let mut temp = path.as_os_str().to_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        fs::write(&temp, bytes)?;
        fs::rename(&temp, path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            StorageError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to rename temp file to {:?}: {}", path, e),
            ))
        })
    }

    fn read_record(sidecar: &Path) -> Result<StoredArchive, StorageError> {
        let raw = fs::read(sidecar)?;
        serde_json::from_slice(&raw).map_err(|e| StorageError::Corrupt {
            key: sidecar.display().to_string(),
            message: e.to_string(),
        })
    }

    fn collect_sidecars(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) -> Result<(), StorageError> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                if depth < 5 {
                    Self::collect_sidecars(&path, depth + 1, out)?;
                }
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(SIDECAR_SUFFIX))
                .unwrap_or(false)
            {
                out.push(path);
            }
        }
        Ok(())
    }
}

impl ArchiveStore for FileArchiveStore {
    fn put(&self, key: &ArchiveKey, bytes: &[u8]) -> Result<StoredArchive, StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::write_atomic(&path, bytes)?;

        let record = StoredArchive {
            key: key.clone(),
            size: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(bytes)),
            created_at: Utc::now(),
        };
        let meta = serde_json::to_vec_pretty(&record).map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::write_atomic(&Self::sidecar_for(&path), &meta)?;
        debug!(archive = %key, size = record.size, "Stored export archive");
        Ok(record)
    }

    fn get(&self, key: &ArchiveKey) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::ArchiveNotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &ArchiveKey) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        let existed = path.exists();
        for target in [path.clone(), Self::sidecar_for(&path)] {
            match fs::remove_file(&target) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(existed)
    }

    fn exists(&self, key: &ArchiveKey) -> Result<bool, StorageError> {
        Ok(self.path_for(key)?.is_file())
    }

    fn list(&self) -> Result<Vec<StoredArchive>, StorageError> {
        let mut sidecars = Vec::new();
        Self::collect_sidecars(&self.root, 0, &mut sidecars)?;
        let mut archives = Vec::with_capacity(sidecars.len());
        for sidecar in sidecars {
            match Self::read_record(&sidecar) {
                Ok(record) => archives.push(record),
                Err(e) => warn!(path = %sidecar.display(), error = %e, "Skipping unreadable archive record"),
            }
        }
        archives.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(archives)
    }
}

/// A signed, time-limited download link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies archive download links with HMAC-SHA256
pub struct DownloadLinkSigner {
    secret: String,
    base_url: Url,
    ttl: Duration,
}

impl DownloadLinkSigner {
    pub fn new(secret: impl Into<String>, base_url: &str, ttl: Duration) -> Result<Self, PrivacyError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(PrivacyError::Configuration(
                "download link signing secret cannot be empty".to_string(),
            ));
        }
        let base_url = Url::parse(base_url).map_err(|e| {
            PrivacyError::Configuration(format!("invalid download base URL {}: {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(PrivacyError::Configuration(format!(
                "download base URL {} cannot carry a path",
                base_url
            )));
        }
        Ok(Self {
            secret,
            base_url,
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn signature(&self, key: &ArchiveKey, expires: i64) -> String {
        let payload = format!("{}:{}", key, expires);
        let mut mac = match HmacSha256::new_from_slice(self.secret.as_bytes()) {
            Ok(mac) => mac,
            // HMAC accepts keys of any length.
            Err(_) => return String::new(),
        };
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn sign(&self, key: &ArchiveKey, now: DateTime<Utc>) -> DownloadLink {
        let expires_at = now + self.ttl;
        let expires = expires_at.timestamp();
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            segments.extend(key.segments().iter());
        }
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &self.signature(key, expires));
        DownloadLink {
            url: url.to_string(),
            expires_at,
        }
    }

    /// Check a link's signature and expiry; returns the archive it grants access to.
    pub fn verify(&self, link: &str, now: DateTime<Utc>) -> Option<ArchiveKey> {
        let url = Url::parse(link).ok()?;
        if url.origin() != self.base_url.origin() {
            return None;
        }
        let segments: Vec<&str> = url.path_segments()?.collect();
        if segments.len() < 5 {
            return None;
        }
        let key = ArchiveKey::from_segments(&segments[segments.len() - 5..])?;

        let mut expires = None;
        let mut signature = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "expires" => expires = value.parse::<i64>().ok(),
                "signature" => signature = Some(value.into_owned()),
                _ => {}
            }
        }
        let expires = expires?;
        let signature = signature?;
        if now.timestamp() > expires {
            return None;
        }
        let expected = self.signature(&key, expires);
        let matches = expected.len() == signature.len()
            && expected
                .as_bytes()
                .iter()
                .zip(signature.as_bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0;
        matches.then_some(key)
    }
}

/// Random 32-byte hex secret for deployments that configure none.
pub fn generate_signing_secret() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}
