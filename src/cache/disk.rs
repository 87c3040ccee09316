//! Disk-backed cache storage
//!
//! Layout under the storage root:
//!
//! ```text
//! buckets.json                                   bucket names in creation order
//! bucket-<urlencoded name>/<sha1 of key>.json   entry metadata
//! bucket-<urlencoded name>/<sha1 of key>.body   response body
//! .staging-XXXX/                                 batch being written
//! ```
//!
//! A batch is fully written into a staging directory before any file is
//! moved into the bucket. Files the batch replaces are moved aside into the
//! staging directory first; if a move fails partway, the new files are
//! removed and the replaced ones put back. Metadata is moved after its body;
//! an entry is visible once its `.json` exists.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::errors::CacheError;
use super::hot::HotResponseCache;
use super::storage::CacheStorage;
use crate::http::{Request, Response};

const BUCKET_PREFIX: &str = "bucket-";
const STAGING_PREFIX: &str = ".staging-";
const ORDER_FILE: &str = "buckets.json";

/// On-disk entry metadata
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryMeta {
    /// Full request key, checked on read
    key: String,
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
}

/// Cache storage persisted to a directory
pub struct DiskCacheStorage {
    /// Root directory holding one subdirectory per bucket
    root: PathBuf,
    hot: HotResponseCache,
    /// Serializes updates of the bucket order file
    order_lock: Mutex<()>,
}

impl DiskCacheStorage {
    /// Open storage rooted at `root`, creating it if needed
    pub fn new(root: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(&root).map_err(|e| CacheError::io(&root, e))?;

        let storage = Self {
            root,
            hot: HotResponseCache::new(),
            order_lock: Mutex::new(()),
        };

        // Staging left by an interrupted batch or order update
        storage.cleanup();

        info!(root = %storage.root.display(), "Disk cache storage initialized");
        Ok(storage)
    }

    /// Remove stale staging directories and files
    pub fn cleanup(&self) {
        if let Ok(read_dir) = fs::read_dir(&self.root) {
            for entry in read_dir.flatten() {
                let name = entry.file_name();
                if !name.to_string_lossy().starts_with(STAGING_PREFIX) {
                    continue;
                }
                let path = entry.path();
                debug!(path = %path.display(), "Removing stale staging entry");
                let result = if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                if let Err(e) = result {
                    warn!(path = %path.display(), error = %e, "Failed to remove staging entry");
                }
            }
        }
    }

    /// Hit/miss statistics of the in-memory front
    pub fn hot_stats(&self) -> (u64, u64, f64) {
        self.hot.stats()
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn bucket_dir(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{}{}", BUCKET_PREFIX, urlencoding::encode(name)))
}

fn entry_stem(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn read_order(root: &Path) -> Result<Vec<String>, CacheError> {
    let path = root.join(ORDER_FILE);
    match fs::read(&path) {
        Ok(data) => serde_json::from_slice(&data).map_err(|e| CacheError::Corrupt {
            path,
            reason: e.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(CacheError::io(&path, e)),
    }
}

/// Replace the order file in one rename
fn write_order(root: &Path, order: &[String]) -> Result<(), CacheError> {
    let path = root.join(ORDER_FILE);
    let data = serde_json::to_vec(order).map_err(|e| CacheError::Corrupt {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    let mut temp = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(root)
        .map_err(|e| CacheError::io(root, e))?;
    temp.write_all(&data).map_err(|e| CacheError::io(temp.path(), e))?;
    temp.persist(&path).map_err(|e| CacheError::io(&path, e.error))?;
    Ok(())
}

/// Bucket names present on disk, ordered by the order file. Directories the
/// order file does not know about follow, sorted by name.
fn list_buckets(root: &Path) -> Result<Vec<String>, CacheError> {
    let read_dir = fs::read_dir(root).map_err(|e| CacheError::io(root, e))?;
    let mut present = Vec::new();
    for entry in read_dir.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_string();
        if let Some(encoded) = file_name.strip_prefix(BUCKET_PREFIX) {
            match urlencoding::decode(encoded) {
                Ok(name) => present.push(name.into_owned()),
                Err(e) => warn!(dir = %file_name, error = %e, "Skipping undecodable bucket directory"),
            }
        }
    }

    let order = read_order(root)?;
    let known: HashSet<&String> = order.iter().collect();
    let mut unknown: Vec<String> = present.iter().filter(|n| !known.contains(n)).cloned().collect();
    unknown.sort();

    let present: HashSet<&String> = present.iter().collect();
    let mut names: Vec<String> = order.iter().filter(|n| present.contains(n)).cloned().collect();
    names.extend(unknown);
    Ok(names)
}

fn read_meta(path: &Path) -> Result<EntryMeta, CacheError> {
    let data = fs::read(path).map_err(|e| CacheError::io(path, e))?;
    serde_json::from_slice(&data).map_err(|e| CacheError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn read_entry(dir: &Path, key: &str) -> Result<Option<Response>, CacheError> {
    let stem = entry_stem(key);
    let meta_path = dir.join(format!("{}.json", stem));
    if !meta_path.exists() {
        return Ok(None);
    }

    let meta = read_meta(&meta_path)?;
    if meta.key != key {
        warn!(path = %meta_path.display(), "Cache entry key mismatch, ignoring");
        return Ok(None);
    }

    let body_path = dir.join(format!("{}.body", stem));
    let body = fs::read(&body_path).map_err(|e| CacheError::io(&body_path, e))?;

    Ok(Some(Response {
        url: meta.url,
        status: meta.status,
        headers: meta.headers,
        body,
    }))
}

fn write_batch(
    root: &Path,
    dir: &Path,
    entries: &[(Request, Response)],
) -> Result<(), CacheError> {
    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(root)
        .map_err(|e| CacheError::io(root, e))?;
    let new_dir = staging.path().join("new");
    let replaced_dir = staging.path().join("replaced");
    for path in [&new_dir, &replaced_dir] {
        fs::create_dir(path).map_err(|e| CacheError::io(path, e))?;
    }

    let mut staged = Vec::with_capacity(entries.len());
    for (request, response) in entries {
        let key = request.cache_key();
        let stem = entry_stem(&key);
        let meta = EntryMeta {
            key,
            url: response.url.clone(),
            status: response.status,
            headers: response.headers.clone(),
        };
        let meta_json = serde_json::to_vec(&meta).map_err(|e| CacheError::Corrupt {
            path: new_dir.join(&stem),
            reason: e.to_string(),
        })?;

        let body_path = new_dir.join(format!("{}.body", stem));
        fs::write(&body_path, &response.body).map_err(|e| CacheError::io(&body_path, e))?;
        let meta_path = new_dir.join(format!("{}.json", stem));
        fs::write(&meta_path, meta_json).map_err(|e| CacheError::io(&meta_path, e))?;

        staged.push(stem);
    }

    let mut moved_in = Vec::new();
    let mut moved_aside = Vec::new();
    for stem in staged {
        for ext in ["body", "json"] {
            let file_name = format!("{}.{}", stem, ext);
            if let Err(e) = commit_file(&new_dir, &replaced_dir, dir, &file_name, &mut moved_in, &mut moved_aside) {
                rollback(&replaced_dir, dir, &moved_in, &moved_aside);
                return Err(e);
            }
        }
    }

    Ok(())
}

fn commit_file(
    new_dir: &Path,
    replaced_dir: &Path,
    dir: &Path,
    file_name: &str,
    moved_in: &mut Vec<String>,
    moved_aside: &mut Vec<String>,
) -> Result<(), CacheError> {
    let to = dir.join(file_name);
    if to.is_file() {
        let aside = replaced_dir.join(file_name);
        fs::rename(&to, &aside).map_err(|e| CacheError::io(&to, e))?;
        moved_aside.push(file_name.to_string());
    }
    fs::rename(new_dir.join(file_name), &to).map_err(|e| CacheError::io(&to, e))?;
    moved_in.push(file_name.to_string());
    Ok(())
}

/// Undo a partial commit: drop the new files, restore the replaced ones
fn rollback(replaced_dir: &Path, dir: &Path, moved_in: &[String], moved_aside: &[String]) {
    for file_name in moved_in {
        let path = dir.join(file_name);
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "Rollback failed to remove new file");
        }
    }
    for file_name in moved_aside {
        let path = dir.join(file_name);
        if let Err(e) = fs::rename(replaced_dir.join(file_name), &path) {
            warn!(path = %path.display(), error = %e, "Rollback failed to restore file");
        }
    }
    warn!(dir = %dir.display(), "Rolled back partial batch commit");
}

/// Run filesystem work off the async runtime
async fn blocking<T, F>(f: F) -> Result<T, CacheError>
where
    F: FnOnce() -> Result<T, CacheError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let _guard = self.order_lock.lock().await;
        let root = self.root.clone();
        let name = name.to_string();
        blocking(move || {
            let dir = bucket_dir(&root, &name);
            fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
            let mut order = read_order(&root)?;
            if !order.contains(&name) {
                order.push(name);
                write_order(&root, &order)?;
            }
            Ok(())
        })
        .await
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        let dir = bucket_dir(&self.root, name);
        blocking(move || Ok(dir.is_dir())).await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let root = self.root.clone();
        blocking(move || list_buckets(&root)).await
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let _guard = self.order_lock.lock().await;
        let root = self.root.clone();
        let owned = name.to_string();
        let existed = blocking(move || {
            let dir = bucket_dir(&root, &owned);
            let existed = dir.is_dir();
            if existed {
                fs::remove_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
            }
            let mut order = read_order(&root)?;
            if order.contains(&owned) {
                order.retain(|n| n != &owned);
                write_order(&root, &order)?;
            }
            Ok(existed)
        })
        .await?;

        if existed {
            self.hot.clear();
            debug!(bucket = name, "Deleted cache bucket from disk");
        }
        Ok(existed)
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Request, Response)>,
    ) -> Result<(), CacheError> {
        let dir = bucket_dir(&self.root, name);
        let keys: Vec<String> = entries.iter().map(|(req, _)| req.cache_key()).collect();
        let root = self.root.clone();
        let bucket = name.to_string();
        blocking(move || {
            if !dir.is_dir() {
                return Err(CacheError::BucketNotFound(bucket));
            }
            write_batch(&root, &dir, &entries)
        })
        .await?;

        self.hot.invalidate(name, &keys);

        debug!(bucket = name, count = keys.len(), "Stored batch on disk");
        Ok(())
    }

    async fn get(&self, name: &str, key: &str) -> Result<Option<Response>, CacheError> {
        if let Some(response) = self.hot.get(name, key) {
            return Ok(Some(response));
        }

        let seen = self.hot.generation();
        let dir = bucket_dir(&self.root, name);
        let owned_key = key.to_string();
        let found = blocking(move || read_entry(&dir, &owned_key)).await?;

        if let Some(response) = &found {
            self.hot.insert_if_unchanged(name, key, response.clone(), seen);
        }
        Ok(found)
    }

    async fn entries(&self, name: &str) -> Result<Vec<String>, CacheError> {
        let dir = bucket_dir(&self.root, name);
        let bucket = name.to_string();
        blocking(move || {
            if !dir.is_dir() {
                return Err(CacheError::BucketNotFound(bucket));
            }
            let read_dir = fs::read_dir(&dir).map_err(|e| CacheError::io(&dir, e))?;
            let mut keys = Vec::new();
            for entry in read_dir.flatten() {
                let path = entry.path();
                if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                    keys.push(read_meta(&path)?.key);
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
    }
}
