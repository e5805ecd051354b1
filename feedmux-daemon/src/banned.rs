//! Ban/hide registry
//!
//! Identities a user asked to hide. Loaded once at startup from a
//! newline-delimited file and written back after each new ban. The write
//! happens outside the lock: take a [`BanRegistry::snapshot`] under the read
//! guard, drop it, then [`persist`].

use feedmux_common::{Error, Result};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Registry shared between the core and every view
///
/// The lock is never held across an await point.
pub type SharedBans = Arc<RwLock<BanRegistry>>;

/// Read access that survives a panicked writer
pub fn read(bans: &SharedBans) -> RwLockReadGuard<'_, BanRegistry> {
    bans.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write(bans: &SharedBans) -> RwLockWriteGuard<'_, BanRegistry> {
    bans.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct BanRegistry {
    path: Option<PathBuf>,
    banned: HashSet<String>,
}

impl BanRegistry {
    /// Registry with no backing file (nothing is persisted)
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the registry backed by `path`
    ///
    /// A missing file is an empty registry. Other read failures are logged
    /// and also yield an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let banned = match std::fs::read_to_string(&path) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No ban list at {}", path.display());
                HashSet::new()
            }
            Err(e) => {
                warn!("Cannot read ban list {}: {}", path.display(), e);
                HashSet::new()
            }
        };

        info!("Loaded {} banned identities", banned.len());
        Self {
            path: Some(path),
            banned,
        }
    }

    pub fn into_shared(self) -> SharedBans {
        Arc::new(RwLock::new(self))
    }

    pub fn is_banned(&self, identity: &str) -> bool {
        self.banned.contains(identity)
    }

    /// Add `identity` to the in-memory list
    ///
    /// Returns `Ok(false)` when it was already banned. The file holds one
    /// identity per line, so line breaks and surrounding whitespace are
    /// rejected rather than silently mangled on the next load.
    pub fn ban(&mut self, identity: &str) -> Result<bool> {
        validate(identity)?;
        Ok(self.banned.insert(identity.to_string()))
    }

    pub fn len(&self) -> usize {
        self.banned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banned.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Backing file and its would-be contents, `None` when in memory
    pub fn snapshot(&self) -> Option<(PathBuf, String)> {
        let path = self.path.clone()?;
        let mut identities: Vec<&str> = self.banned.iter().map(String::as_str).collect();
        identities.sort_unstable();
        let mut content = identities.join("\n");
        content.push('\n');
        Some((path, content))
    }
}

fn validate(identity: &str) -> Result<()> {
    if identity.is_empty() {
        return Err(Error::InvalidInput("identity must not be empty".to_string()));
    }
    if identity.contains(['\n', '\r']) {
        return Err(Error::InvalidInput(
            "identity must not contain line breaks".to_string(),
        ));
    }
    if identity.trim() != identity {
        return Err(Error::InvalidInput(
            "identity must not start or end with whitespace".to_string(),
        ));
    }
    Ok(())
}

/// Write a ban list snapshot to `path` (temp file then rename)
pub async fn persist(path: &Path, content: String) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!("Wrote ban list {}", path.display());
    Ok(())
}
