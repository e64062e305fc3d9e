// Settings and policy documents on disk

use crate::env::DEFAULT_PREFIX;
use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Format of a settings or policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    /// `KEY=value` lines, as in a `.env` file.
    Env,
}

impl FileFormat {
    /// Format named by a file extension, ignoring case.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            "env" => Some(Self::Env),
            _ => None,
        }
    }

    /// Format of the document at `path`. A file named `.env` is an env file.
    pub fn detect(path: &Path) -> Result<Self> {
        if path.file_name().is_some_and(|name| name == ".env") {
            return Ok(Self::Env);
        }
        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            return Err(ConfigError::LoadError(format!(
                "{}: no extension to pick a document format from",
                path.display()
            )));
        };
        Self::from_extension(ext).ok_or_else(|| {
            ConfigError::LoadError(format!("{}: unsupported document format '{ext}'", path.display()))
        })
    }

    /// Parse `content` into a JSON tree.
    pub fn parse(self, content: &str) -> Result<Value> {
        match self {
            Self::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError(format!("invalid JSON document: {e}"))),
            Self::Toml => toml::from_str(content)
                .map_err(|e| ConfigError::ParseError(format!("invalid TOML document: {e}"))),
            Self::Env => parse_env_lines(content).map(Value::Object),
        }
    }
}

/// Read a document from disk as text.
pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| ConfigError::LoadError(format!("failed to read {}: {e}", path.display())))
}

/// Read and parse the document at `path`.
///
/// With no `format` given it is detected from the file name.
pub fn read_document(path: &Path, format: Option<FileFormat>) -> Result<Value> {
    let format = match format {
        Some(format) => format,
        None => FileFormat::detect(path)?,
    };
    format.parse(&read_text(path)?)
}

/// Keys come out lowercased with any `SAFEGUARD_` prefix removed, matching
/// what [`EnvLoader`](crate::EnvLoader) produces for the process environment.
fn parse_env_lines(content: &str) -> Result<Map<String, Value>> {
    let mut entries = Map::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::ParseError(format!(
                "line {}: expected KEY=value",
                index + 1
            )));
        };

        let key = key.trim();
        let key = key
            .strip_prefix(DEFAULT_PREFIX)
            .and_then(|rest| rest.strip_prefix('_'))
            .filter(|rest| !rest.is_empty())
            .unwrap_or(key);
        entries.insert(key.to_lowercase(), Value::String(unquote(value.trim()).to_string()));
    }

    Ok(entries)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_json_settings() {
        let value = FileFormat::Json
            .parse(r#"{"worker_pool_max_workers": 8, "non_fallback_enabled": false}"#)
            .unwrap();
        assert_eq!(value["worker_pool_max_workers"], 8);
        assert_eq!(value["non_fallback_enabled"], false);
    }

    #[test]
    fn test_toml_settings() {
        let value = FileFormat::Toml
            .parse(
                r#"
                non_fallback_enabled = true
                worker_pool_queue_capacity = 64
                "#,
            )
            .unwrap();
        assert_eq!(value["non_fallback_enabled"], true);
        assert_eq!(value["worker_pool_queue_capacity"], 64);
    }

    #[test]
    fn test_env_lines_match_process_keys() {
        let value = FileFormat::Env
            .parse(
                r#"
                # engine switches
                SAFEGUARD_NON_FALLBACK_ENABLED=false
                export WORKER_POOL_MAX_WORKERS = 4
                LABEL="it's quoted"
                "#,
            )
            .unwrap();
        assert_eq!(value["non_fallback_enabled"], "false");
        assert_eq!(value["worker_pool_max_workers"], "4");
        assert_eq!(value["label"], "it's quoted");
    }

    #[test]
    fn test_env_line_without_separator() {
        let err = FileFormat::Env.parse("A=1\nB").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(ref msg) if msg.starts_with("line 2")));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            FileFormat::Toml.parse("operations = [unterminated"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_extension("TOML"), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_extension("yaml"), None);
        assert_eq!(FileFormat::detect(Path::new("conf/policies.json")).unwrap(), FileFormat::Json);
        assert_eq!(FileFormat::detect(Path::new("/srv/app/.env")).unwrap(), FileFormat::Env);
        assert!(FileFormat::detect(Path::new("policies")).is_err());
        assert!(FileFormat::detect(Path::new("policies.yaml")).is_err());
    }

    #[test]
    fn test_read_document_detects_format() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "worker_pool_max_workers = 2").unwrap();

        let value = read_document(file.path(), None).unwrap();
        assert_eq!(value["worker_pool_max_workers"], 2);

        let err = read_document(Path::new("/nonexistent/safeguard.json"), None).unwrap_err();
        assert!(matches!(err, ConfigError::LoadError(_)));
    }
}
