use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::model::UnitError;

/// Identity of a persisted training artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKey {
    /// The HMM of one word.
    Acoustic { speaker: String, word: String },
    /// The word regressor of one speaker.
    Regressor { speaker: String },
}

impl ArtifactKey {
    pub fn acoustic(speaker: &str, word: &str) -> Self {
        Self::Acoustic {
            speaker: speaker.to_string(),
            word: word.to_lowercase(),
        }
    }

    pub fn regressor(speaker: &str) -> Self {
        Self::Regressor {
            speaker: speaker.to_string(),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acoustic { speaker, word } => write!(f, "{speaker}/acoustic/{word}"),
            Self::Regressor { speaker } => write!(f, "{speaker}/regressor"),
        }
    }
}

/// Keyed byte storage for trained artifacts.
///
/// The format is opaque to the store; [`save_artifact`] and
/// [`load_artifact`] put JSON on top.
pub trait ArtifactStore {
    fn save(&mut self, key: &ArtifactKey, bytes: &[u8]) -> Result<(), UnitError>;

    /// Fails with [`UnitError::ModelLoad`] when nothing is stored under `key`.
    fn load(&self, key: &ArtifactKey) -> Result<Vec<u8>, UnitError>;

    /// Delete the artifact; returns whether one existed.
    fn remove(&mut self, key: &ArtifactKey) -> Result<bool, UnitError>;
}

pub fn save_artifact<T, S>(store: &mut S, key: &ArtifactKey, value: &T) -> Result<(), UnitError>
where
    T: Serialize,
    S: ArtifactStore + ?Sized,
{
    let bytes = serde_json::to_vec(value)?;
    store.save(key, &bytes)?;
    log::debug!("Saved artifact {key} ({} bytes)", bytes.len());
    Ok(())
}

/// Load and decode an artifact; a corrupt payload is reported as
/// [`UnitError::ModelLoad`] just like a missing one.
pub fn load_artifact<T, S>(store: &S, key: &ArtifactKey) -> Result<T, UnitError>
where
    T: DeserializeOwned,
    S: ArtifactStore + ?Sized,
{
    let bytes = store.load(key)?;
    serde_json::from_slice(&bytes).map_err(|e| UnitError::ModelLoad {
        key: key.to_string(),
        reason: format!("corrupt artifact: {e}"),
    })
}

/// Artifacts as JSON files under `root/<speaker>/`.
///
/// Layout: `acoustic/<word>.json` per word and `regressor.json` per speaker.
/// Writes go to a temporary file that is then renamed over the target, so
/// readers see either the previous or the new artifact.
#[derive(Debug, Clone)]
pub struct DirArtifactStore {
    root: PathBuf,
}

impl DirArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, key: &ArtifactKey) -> PathBuf {
        match key {
            ArtifactKey::Acoustic { speaker, word } => self
                .root
                .join(speaker)
                .join("acoustic")
                .join(format!("{word}.json")),
            ArtifactKey::Regressor { speaker } => self.root.join(speaker).join("regressor.json"),
        }
    }
}

impl ArtifactStore for DirArtifactStore {
    fn save(&mut self, key: &ArtifactKey, bytes: &[u8]) -> Result<(), UnitError> {
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, key: &ArtifactKey) -> Result<Vec<u8>, UnitError> {
        let path = self.path_of(key);
        std::fs::read(&path).map_err(|e| UnitError::ModelLoad {
            key: key.to_string(),
            reason: format!("{}: {e}", path.display()),
        })
    }

    fn remove(&mut self, key: &ArtifactKey) -> Result<bool, UnitError> {
        match std::fs::remove_file(self.path_of(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Artifacts kept in memory for the lifetime of the store.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactStore {
    entries: HashMap<ArtifactKey, Vec<u8>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &ArtifactKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn save(&mut self, key: &ArtifactKey, bytes: &[u8]) -> Result<(), UnitError> {
        self.entries.insert(key.clone(), bytes.to_vec());
        Ok(())
    }

    fn load(&self, key: &ArtifactKey) -> Result<Vec<u8>, UnitError> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| UnitError::ModelLoad {
                key: key.to_string(),
                reason: "not found".to_string(),
            })
    }

    fn remove(&mut self, key: &ArtifactKey) -> Result<bool, UnitError> {
        Ok(self.entries.remove(key).is_some())
    }
}
