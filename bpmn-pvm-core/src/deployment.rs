use crate::definition::ProcessDefinition;
use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Hex SHA-256 of a model source.
pub fn checksum(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

/// Outcome of [`DeploymentCache::deploy`].
#[derive(Clone, Debug)]
pub struct Deployed {
    pub definition: Arc<ProcessDefinition>,
    /// False when an identical source was already deployed as the latest version.
    pub is_new: bool,
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<String, Arc<ProcessDefinition>>,
    latest: HashMap<String, Arc<ProcessDefinition>>,
}

/// Registry of deployed definitions, by id (`key:version`) and by key.
pub struct DeploymentCache {
    inner: RwLock<Inner>,
}

impl DeploymentCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register `definition` as the next version of its key. A definition
    /// whose checksum equals the latest version's reuses that version.
    pub fn deploy(&self, definition: ProcessDefinition) -> Result<Deployed> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let version = match inner.latest.get(definition.key()) {
            Some(latest) if latest.checksum().is_some() && latest.checksum() == definition.checksum() => {
                return Ok(Deployed {
                    definition: latest.clone(),
                    is_new: false,
                });
            }
            Some(latest) => latest.version() + 1,
            None => 1,
        };
        let definition = Arc::new(definition.with_version(version));
        inner.by_id.insert(definition.id(), definition.clone());
        inner
            .latest
            .insert(definition.key().to_string(), definition.clone());
        info!(definition = %definition.id(), "deployed process definition");
        Ok(Deployed {
            definition,
            is_new: true,
        })
    }

    /// Register a previously deployed version as is.
    pub fn restore(&self, definition: ProcessDefinition) -> Result<Arc<ProcessDefinition>> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let definition = Arc::new(definition);
        inner.by_id.insert(definition.id(), definition.clone());
        let newer = inner
            .latest
            .get(definition.key())
            .map_or(true, |latest| latest.version() < definition.version());
        if newer {
            inner
                .latest
                .insert(definition.key().to_string(), definition.clone());
        }
        Ok(definition)
    }

    pub fn get(&self, id: &str) -> Result<Option<Arc<ProcessDefinition>>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(inner.by_id.get(id).cloned())
    }

    pub fn latest(&self, key: &str) -> Result<Option<Arc<ProcessDefinition>>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(inner.latest.get(key).cloned())
    }

    pub fn definitions(&self) -> Result<Vec<Arc<ProcessDefinition>>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut all: Vec<_> = inner.by_id.values().cloned().collect();
        all.sort_by(|a, b| a.key().cmp(b.key()).then(a.version().cmp(&b.version())));
        Ok(all)
    }
}

impl Default for DeploymentCache {
    fn default() -> Self {
        Self::new()
    }
}
