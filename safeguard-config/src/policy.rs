// Policy files declaring fault-tolerance policies per operation
//
// ```toml
// [operations."billing::charge(u64)"]
// asynchronous = true
//
// [operations."billing::charge(u64)".retry]
// max_retries = 3
// delay_ms = 100
//
// [operations."billing::charge(u64)".timeout]
// value = 2
// unit = "seconds"
// ```

use crate::document::{FileFormat, read_text};
use crate::validation::{ConfigValidator, Validate};
use crate::{ConfigError, Result};
use safeguard_core::{PolicyDescriptors, StaticDescriptors};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Parsed contents of a policy file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyFile {
    pub operations: HashMap<String, PolicyDescriptors>,
}

impl PolicyFile {
    /// Parse a policy document in the given format.
    pub fn parse(content: &str, format: FileFormat) -> Result<Self> {
        if format == FileFormat::Env {
            return Err(ConfigError::LoadError(
                "policy files must be JSON or TOML".to_string(),
            ));
        }
        let value = format.parse(content)?;
        let file: PolicyFile = serde_json::from_value(value)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;
        file.validate()?;
        Ok(file)
    }

    /// Descriptor provider over the declared operations.
    pub fn into_descriptors(self) -> StaticDescriptors {
        StaticDescriptors::from(self.operations)
    }
}

impl Validate for PolicyFile {
    fn validate(&self) -> Result<()> {
        for (operation, declared) in &self.operations {
            ConfigValidator::not_empty(operation, "operation id")?;
            if let Some(fallback) = &declared.fallback {
                ConfigValidator::not_empty(&fallback.handler, "fallback handler")?;
            }
        }
        Ok(())
    }
}

/// Load a JSON or TOML policy file, picking the format from its extension.
///
/// Value ranges are not checked here; malformed policies surface as
/// configuration errors when their plan is first resolved.
pub fn load_policy_file(path: impl AsRef<Path>) -> Result<StaticDescriptors> {
    let path = path.as_ref();
    let format = FileFormat::detect(path)?;
    let file = PolicyFile::parse(&read_text(path)?, format)?;
    info!(
        path = %path.display(),
        operations = file.operations.len(),
        "Policy file loaded"
    );
    Ok(file.into_descriptors())
}
