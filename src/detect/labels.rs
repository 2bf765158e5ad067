use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

/// Fixed id → name table loaded alongside a model.
#[derive(Clone, Debug)]
pub struct ClassNames {
    names: Arc<Vec<String>>,
    ids: Arc<HashMap<String, usize>>,
}

impl ClassNames {
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(anyhow!("class table is empty"));
        }
        let mut ids = HashMap::with_capacity(names.len());
        for (id, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(anyhow!("class id {} has an empty name", id));
            }
            if ids.insert(name.clone(), id).is_some() {
                return Err(anyhow!("class name '{}' appears more than once", name));
            }
        }
        Ok(Self {
            names: Arc::new(names),
            ids: Arc::new(ids),
        })
    }

    /// Load a class table.
    ///
    /// Accepts a JSON array of names, or plain text with one name per line
    /// (blank lines and `#` comments skipped).
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read class table {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid class table {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim_start().starts_with('[') {
            let names: Vec<String> = serde_json::from_str(raw)?;
            return Self::new(names);
        }
        let names = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self::new(names)
    }

    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    pub fn id_of(&self, name: &str) -> Option<usize> {
        self.ids.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}
