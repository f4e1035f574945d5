//! Loader configuration, read from RON, TOML or JSON.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file from its extension.
pub fn detect_format(path: &Path) -> Result<Format, ConfigError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(ConfigError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

/// Parses `content` as `format`. `file` only labels errors.
pub fn deserialize_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    file: &Path,
) -> Result<T, ConfigError> {
    let parse_error = |detail: String| ConfigError::Parse {
        file: file.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
    }
}

/// Read a file and deserialize it according to its extension.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    deserialize_str(&content, format, path)
}

// ===========================================================================
// LoaderConfig
// ===========================================================================

/// Knobs for one load. Every field has a default, so an empty file is a
/// valid config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Required root element name. When unset, the first document's root
    /// name is required of the rest.
    pub root_name: Option<String>,
    /// Build top-level nodes marked `Abstract` too.
    pub include_abstracts: bool,
    /// Log the merged document at debug level before building.
    pub log_merged_document: bool,
}

impl LoaderConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        deserialize_file(path)
    }

    pub fn with_root_name(mut self, name: impl Into<String>) -> Self {
        self.root_name = Some(name.into());
        self
    }

    pub fn with_abstracts(mut self, include: bool) -> Self {
        self.include_abstracts = include;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "defloom_config_test_{suffix}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn formats_by_extension() {
        assert_eq!(detect_format(Path::new("loader.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("loader.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("loader.json")).unwrap(), Format::Json);
        assert!(matches!(
            detect_format(Path::new("loader.yaml")),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn every_format_yields_the_same_config() {
        let expected = LoaderConfig::default()
            .with_root_name("Defs")
            .with_abstracts(true);
        let ron: LoaderConfig = deserialize_str(
            r#"(root_name: Some("Defs"), include_abstracts: true)"#,
            Format::Ron,
            Path::new("a.ron"),
        )
        .unwrap();
        let toml: LoaderConfig = deserialize_str(
            "root_name = \"Defs\"\ninclude_abstracts = true\n",
            Format::Toml,
            Path::new("a.toml"),
        )
        .unwrap();
        let json: LoaderConfig = deserialize_str(
            r#"{"root_name": "Defs", "include_abstracts": true}"#,
            Format::Json,
            Path::new("a.json"),
        )
        .unwrap();
        assert_eq!(ron, expected);
        assert_eq!(toml, expected);
        assert_eq!(json, expected);
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let config: LoaderConfig = deserialize_str("", Format::Toml, Path::new("a.toml")).unwrap();
        assert_eq!(config, LoaderConfig::default());
    }

    #[test]
    fn from_file_reports_parse_errors_with_path() {
        let dir = make_test_dir("parse_error");
        let path = dir.join("loader.json");
        fs::write(&path, "{ not json").unwrap();

        let err = LoaderConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref file, .. } if file == &path));

        fs::write(&path, r#"{"log_merged_document": true}"#).unwrap();
        assert!(LoaderConfig::from_file(&path).unwrap().log_merged_document);

        let _ = fs::remove_dir_all(&dir);
    }
}
