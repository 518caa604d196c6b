//! Filesystem script adapter: one `.pine` file, or every `.pine` file in a
//! directory (not recursive).

use crate::domain::converter::NamedScript;
use crate::domain::error::PinecastError;
use crate::ports::script_port::ScriptPort;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SCRIPT_EXTENSION: &str = "pine";

pub struct FsScriptAdapter {
    path: PathBuf,
}

impl FsScriptAdapter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn script_name(path: &Path) -> String {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }

    fn read(path: &Path) -> Result<NamedScript, PinecastError> {
        let source = fs::read_to_string(path).map_err(|e| {
            PinecastError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to read {}: {}", path.display(), e),
            ))
        })?;
        Ok(NamedScript::new(Self::script_name(path), source))
    }
}

impl ScriptPort for FsScriptAdapter {
    fn load_scripts(&self) -> Result<Vec<NamedScript>, PinecastError> {
        if !self.path.is_dir() {
            return Ok(vec![Self::read(&self.path)?]);
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION))
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(PinecastError::NoScripts {
                path: self.path.display().to_string(),
            });
        }
        debug!(dir = %self.path.display(), count = paths.len(), "loading scripts");
        paths.iter().map(|p| Self::read(p)).collect()
    }
}
