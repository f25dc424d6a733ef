/// The binary slot: where the build drops the executable, plus the backup
/// copy of the last stable build kept next to it.
///
/// Both files may exist at once only between `preserve` and the cycle's
/// `commit`/`restore`.
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct BinarySlot {
    binary: PathBuf,
    backup: PathBuf,
}

impl BinarySlot {
    pub fn new(binary: impl Into<PathBuf>, backup: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            backup: backup.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn backup(&self) -> &Path {
        &self.backup
    }

    pub fn has_binary(&self) -> bool {
        self.binary.exists()
    }

    pub fn has_backup(&self) -> bool {
        self.backup.exists()
    }

    /// Move the current binary aside as the backup.
    /// Returns Ok(false) when there was no binary to preserve.
    pub fn preserve(&self) -> std::io::Result<bool> {
        if !self.has_binary() {
            return Ok(false);
        }
        std::fs::rename(&self.binary, &self.backup)?;
        Ok(true)
    }

    /// Delete whatever sits at the binary path. Missing is fine.
    pub fn discard_binary(&self) -> std::io::Result<()> {
        remove_if_present(&self.binary)
    }

    /// Move the backup back to the binary path.
    pub fn restore(&self) -> std::io::Result<()> {
        std::fs::rename(&self.backup, &self.binary)
    }

    /// Make the last swap permanent by dropping the backup.
    pub fn commit(&self) -> std::io::Result<()> {
        remove_if_present(&self.backup)
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
