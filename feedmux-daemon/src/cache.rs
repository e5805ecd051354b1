//! On-disk result cache
//!
//! One JSON file per `(service, query, params)` key holding the last
//! published set as a list of wire tuples. There is no TTL: staleness is
//! bounded by the view's refresh interval.
//!
//! Local image paths under the thumbnail directory are stored relative to it
//! so cache files stay valid when the cache directory moves. Each entry lists
//! the keys it rewrote, and only those are joined back on load.

use crate::banned::{self, SharedBans};
use feedmux_common::{DeltaSet, Params, Record, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Property keys that may hold paths into the thumbnail directory
const IMAGE_KEYS: &[&str] = &["authoricon", "thumbnail"];

/// One stored record plus the image keys that were made relative
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    #[serde(flatten)]
    record: Record,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    relative: Vec<String>,
}

/// Cache key: service, query and the stable hash of the params
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    service: String,
    query: String,
    params_hash: String,
}

impl CacheKey {
    pub fn new(service: &str, query: &str, params: &Params) -> Self {
        Self {
            service: service.to_string(),
            query: query.to_string(),
            params_hash: params.stable_hash(),
        }
    }

    /// `<service>-<query>-<paramhash>.json`
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.json",
            sanitize(&self.service),
            sanitize(&self.query),
            self.params_hash
        )
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.service, self.query, &self.params_hash[..8])
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

/// Result cache rooted at one directory
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
    thumbnail_dir: PathBuf,
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>, thumbnail_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            thumbnail_dir: thumbnail_dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Load the set stored for `key`, minus banned identities
    ///
    /// `Ok(None)` when nothing is cached.
    pub async fn load(&self, key: &CacheKey, bans: &SharedBans) -> Result<Option<DeltaSet>> {
        let path = self.path_for(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!("No cache file for {}", key);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let entries: Vec<CacheEntry> = serde_json::from_str(&content)?;
        let bans = banned::read(bans);
        let set = DeltaSet::from_records(
            entries
                .into_iter()
                .filter(|entry| !bans.is_banned(entry.record.identity()))
                .map(|entry| Arc::new(self.absolutize(entry))),
        );

        debug!("Loaded {} cached items for {}", set.len(), key);
        Ok(Some(set))
    }

    /// Overwrite the entry for `key` with `set`
    ///
    /// An empty set removes the entry instead.
    pub async fn save(&self, key: &CacheKey, set: &DeltaSet) -> Result<()> {
        if set.is_empty() {
            return self.drop_entry(key).await;
        }

        let mut entries: Vec<CacheEntry> =
            set.iter().map(|record| self.relativize(record)).collect();
        entries.sort_by(|a, b| {
            b.record
                .timestamp()
                .cmp(&a.record.timestamp())
                .then_with(|| a.record.identity().cmp(b.record.identity()))
        });
        let json = serde_json::to_vec_pretty(&entries)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Saved {} items for {}", entries.len(), key);
        Ok(())
    }

    /// Delete the entry for `key`; a missing entry is not an error
    pub async fn drop_entry(&self, key: &CacheKey) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => {
                debug!("Dropped cache for {}", key);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn relativize(&self, record: &Record) -> CacheEntry {
        let mut out = record.clone();
        let mut relative = Vec::new();
        for key in IMAGE_KEYS {
            if let Some(path) = record.get_str(key) {
                if let Ok(rel) = Path::new(path).strip_prefix(&self.thumbnail_dir) {
                    out = out.with_property(*key, rel.to_string_lossy().into_owned());
                    relative.push(key.to_string());
                }
            }
        }
        CacheEntry {
            record: out,
            relative,
        }
    }

    fn absolutize(&self, entry: CacheEntry) -> Record {
        let mut out = entry.record;
        for key in &entry.relative {
            let Some(value) = out.get_str(key) else {
                continue;
            };
            let absolute = self.thumbnail_dir.join(value).to_string_lossy().into_owned();
            out = out.with_property(key.as_str(), absolute);
        }
        out
    }
}
