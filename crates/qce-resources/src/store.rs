use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use qce_core::config::HEALTH_CACHE_TTL_SECS;
use qce_core::resource::ResourceInfo;

use crate::error::Result;

/// Content-addressed media store.
///
/// Layout: `root/{images,videos,audios,files}/<md5>_<sanitizedFileName>`.
/// Hash-less resources get an identity digest instead so their target path
/// is still stable across runs.
pub struct ResourceStore {
    root: PathBuf,
    /// identity -> (checked_at, healthy). Avoids re-hashing the same file on
    /// every sighting; entries expire after five minutes.
    health_cache: Mutex<HashMap<String, (Instant, bool)>>,
}

impl ResourceStore {
    /// Create the store, making sure all four type directories exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for sub in ["images", "videos", "audios", "files"] {
            std::fs::create_dir_all(root.join(sub))?;
        }
        Ok(Self {
            root,
            health_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn target_path(&self, resource: &ResourceInfo) -> PathBuf {
        self.root
            .join(resource.resource_type.subdir())
            .join(resource.storage_file_name())
    }

    /// MD5 of a file, streamed in 64 KiB chunks.
    pub fn hash_file(path: &Path) -> std::io::Result<String> {
        let mut file = std::fs::File::open(path)?;
        let mut ctx = md5::Context::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            ctx.consume(&buf[..n]);
        }
        Ok(hex::encode(ctx.compute().0))
    }

    /// Healthy iff the local file exists, is non-empty, matches the known
    /// size (when known) and matches the known md5 (when known).
    ///
    /// Results are cached per identity for five minutes; pass `force` to
    /// bypass the cache (the periodic scan does).
    pub fn check_health(&self, resource: &ResourceInfo, force: bool) -> bool {
        let identity = resource.identity();
        if !force {
            let cache = self.health_cache.lock().unwrap();
            if let Some((at, healthy)) = cache.get(&identity) {
                if at.elapsed() < Duration::from_secs(HEALTH_CACHE_TTL_SECS) {
                    return *healthy;
                }
            }
        }

        let healthy = self.check_health_uncached(resource);
        self.health_cache
            .lock()
            .unwrap()
            .insert(identity, (Instant::now(), healthy));
        healthy
    }

    fn check_health_uncached(&self, resource: &ResourceInfo) -> bool {
        let path = match &resource.local_path {
            Some(p) => PathBuf::from(p),
            None => self.target_path(resource),
        };
        let Ok(meta) = std::fs::metadata(&path) else {
            return false;
        };
        if meta.len() == 0 {
            return false;
        }
        if resource.file_size > 0 && meta.len() != resource.file_size as u64 {
            debug!(file = %path.display(), "size mismatch during health check");
            return false;
        }
        if !resource.md5.is_empty() {
            match Self::hash_file(&path) {
                Ok(actual) if actual == resource.md5 => {}
                _ => {
                    debug!(file = %path.display(), "md5 mismatch during health check");
                    return false;
                }
            }
        }
        true
    }
}
