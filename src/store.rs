//! Panel state persistence backed by a TOML file

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::host::StateStore;
use crate::{Config, PartialConfig};

#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    /// A missing file is an empty state, not an error.
    fn load_initial_state(&self) -> Result<PartialConfig> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No saved panel state at {}", self.path.display());
                Ok(PartialConfig::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn persist_state(&mut self, config: &Config) -> Result<()> {
        let text = toml::to_string_pretty(config)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, text)?;
        Ok(())
    }
}
