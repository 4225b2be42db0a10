//! Template loaders
//!
//! A loader resolves a template name to source text and reports whether
//! the backing source changed since it was last loaded; the environment
//! cache uses that to decide when to recompile.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use log::debug;

use crate::error::TemplateError;

/// Resolves template names to source text.
pub trait Loader: Send + Sync {
    /// Load the source text for `name`, or fail with
    /// [`TemplateError::NotFound`] / [`TemplateError::Io`].
    fn load(&self, name: &str) -> Result<String, TemplateError>;

    /// Whether `name`'s backing source changed since the last `load`.
    /// Defaults to `true`, which disables caching for loaders that cannot
    /// track modification.
    fn is_modified(&self, _name: &str) -> bool {
        true
    }
}

/// Loads templates from a list of search directories, remembering each
/// file's modification time to answer `is_modified`.
pub struct FileLoader {
    search_paths: Vec<PathBuf>,
    history: Mutex<HashMap<PathBuf, SystemTime>>,
}

impl FileLoader {
    pub fn new(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            search_paths: paths.into_iter().map(Into::into).collect(),
            history: Mutex::new(HashMap::new()),
        }
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.exists())
    }
}

impl Default for FileLoader {
    /// Searches `templates/` and the working directory.
    fn default() -> Self {
        Self::new(["templates", "."])
    }
}

impl Loader for FileLoader {
    fn load(&self, name: &str) -> Result<String, TemplateError> {
        let path = self
            .locate(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
        let content = fs::read_to_string(&path).map_err(|e| TemplateError::Io {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        if let Ok(mtime) = fs::metadata(&path).and_then(|meta| meta.modified()) {
            self.history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(path, mtime);
        }
        debug!("loaded template '{}'", name);
        Ok(content)
    }

    fn is_modified(&self, name: &str) -> bool {
        let Some(path) = self.locate(name) else {
            return true;
        };
        let current = match fs::metadata(&path).and_then(|meta| meta.modified()) {
            Ok(mtime) => mtime,
            Err(_) => return true,
        };
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        match history.get(&path) {
            Some(loaded) => current > *loaded,
            None => true,
        }
    }
}

/// In-memory loader for tests and embedded template sets.
#[derive(Default)]
pub struct MemoryLoader {
    templates: Mutex<HashMap<String, MemoryEntry>>,
}

struct MemoryEntry {
    source: String,
    modified: bool,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a template; marks it modified so caches reload.
    pub fn insert(&self, name: impl Into<String>, source: impl Into<String>) {
        self.templates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                name.into(),
                MemoryEntry {
                    source: source.into(),
                    modified: true,
                },
            );
    }
}

impl Loader for MemoryLoader {
    fn load(&self, name: &str) -> Result<String, TemplateError> {
        let mut templates = self
            .templates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match templates.get_mut(name) {
            Some(entry) => {
                entry.modified = false;
                Ok(entry.source.clone())
            }
            None => Err(TemplateError::NotFound(name.to_string())),
        }
    }

    fn is_modified(&self, name: &str) -> bool {
        self.templates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|entry| entry.modified)
            .unwrap_or(true)
    }
}
