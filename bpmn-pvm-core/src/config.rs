//! Engine configuration.
//!
//! Loaded from YAML, e.g.
//!
//! ```yaml
//! history_enabled: true
//! max_call_depth: 8
//! default_delete_reason: cancelled
//! deployments:
//!   - processes/order.yaml
//!   - processes/billing.bpmn20.xml
//! ```

use crate::runtime::DEFAULT_MAX_CALL_DEPTH;
use crate::store::ModelFormat;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Append runtime events to the store's event log on commit.
    pub history_enabled: bool,
    /// Maximum nesting of call activities.
    pub max_call_depth: usize,
    /// Reason recorded when a process instance is deleted without one.
    pub default_delete_reason: String,
    /// Process model files deployed by `ProcessEngine::bootstrap`.
    pub deployments: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_enabled: true,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            default_delete_reason: "deleted".to_string(),
            deployments: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file. Relative deployment paths are
    /// resolved against the file's directory.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("parsing engine config {}", path.display()))?;
        if let Some(base) = path.parent() {
            for deployment in &mut config.deployments {
                if deployment.is_relative() {
                    *deployment = base.join(&*deployment);
                }
            }
        }
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }
}

/// Model format of a deployment file, from its extension: `.yaml`/`.yml`
/// are YAML models, `.bpmn`/`.xml` are BPMN 2.0 XML.
pub fn model_format(path: &Path) -> Option<ModelFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "yaml" | "yml" => Some(ModelFormat::Yaml),
        "bpmn" | "xml" => Some(ModelFormat::BpmnXml),
        _ => None,
    }
}
