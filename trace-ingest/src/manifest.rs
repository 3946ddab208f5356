use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// On-disk cache of raw provider manifests, shared by every worker of the
/// process so a new session can decode a provider before its manifest is
/// broadcast again.
#[derive(Debug, Clone, Default)]
pub struct ManifestStore {
    dir: Option<PathBuf>,
}

impl ManifestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// A store that persists nothing and loads nothing.
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Returns the manifest text last persisted for `provider`, if any.
    pub fn load(&self, provider: &str) -> io::Result<Option<String>> {
        let Some(path) = self.path_for(provider) else {
            return Ok(None);
        };

        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Writes the manifest to a uniquely named temporary file and renames it
    /// into place, so readers never see a partial manifest and concurrent
    /// writers of the same provider do not collide.
    pub fn persist(&self, provider: &str, manifest: &str) -> io::Result<()> {
        let (Some(dir), Some(path)) = (self.dir.as_deref(), self.path_for(provider)) else {
            return Ok(());
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(manifest.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|err| err.error)?;

        Ok(())
    }

    fn path_for(&self, provider: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(manifest_file_name(provider)))
    }
}

fn manifest_file_name(provider: &str) -> String {
    let sanitized: String = provider
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{sanitized}.manifest.json")
}
