// 📄 JSON file store - human-readable snapshot, replaced atomically

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::PersistencePort;
use crate::error::PersistenceError;
use crate::ledger::LedgerSnapshot;

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Write `bytes` next to `target` and rename over it, so readers never see a
/// half-written file.
pub(crate) fn write_atomic(target: &Path, tmp: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    {
        let mut file = File::create(tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(tmp, target)
}

impl PersistencePort for JsonFileStore {
    fn load(&mut self) -> Result<Option<LedgerSnapshot>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(None);
        }

        let snapshot: LedgerSnapshot = serde_json::from_str(&raw).map_err(|e| {
            PersistenceError::malformed(format!("{}: {}", self.path.display(), e))
        })?;
        debug!(path = %self.path.display(), members = snapshot.members.len(), "ledger loaded");
        Ok(Some(snapshot))
    }

    fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.path, &self.tmp_path(), &bytes)?;
        debug!(path = %self.path.display(), "ledger saved");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}
