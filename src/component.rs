//! Component definitions and spec document parsing.
//!
//! This module provides:
//! - `Component`, a single unit of work with declared dependencies
//! - `Complexity`, the authored complexity tier of a component
//! - `SpecMetadata`, the global settings a spec may carry
//! - `SpecDocument::parse`, which validates required fields before any graph exists

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::ParseError;

/// Complexity tier authored for a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Low => write!(f, "low"),
            Complexity::Medium => write!(f, "medium"),
            Complexity::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Complexity::Low),
            "medium" => Ok(Complexity::Medium),
            "high" => Ok(Complexity::High),
            other => Err(format!(
                "unknown complexity '{}'. Valid values: low, medium, high",
                other
            )),
        }
    }
}

/// A single unit of work.
///
/// Components are immutable once parsed; re-specifying work means parsing a
/// new document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Unique id, referenced by `depends_on` of other components
    pub id: String,
    /// File or target path this component produces
    pub file: String,
    /// Free-text purpose handed to workers unchanged
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub complexity: Complexity,
    /// Ids of components that must complete first, in declaration order
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Component {
    pub fn new(id: &str, file: &str, depends_on: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            file: file.to_string(),
            purpose: String::new(),
            complexity: Complexity::default(),
            depends_on,
        }
    }

    pub fn with_purpose(mut self, purpose: &str) -> Self {
        self.purpose = purpose.to_string();
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }
}

/// Global settings carried by a spec document.
///
/// Unset values fall back to the project configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecMetadata {
    /// Required test coverage, in percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_target: Option<f64>,
    /// Maximum remediation attempts per retry loop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Number of review passes per validation check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    metadata: Option<SpecMetadata>,
    components: Option<Vec<RawComponent>>,
}

#[derive(Debug, Deserialize)]
struct RawComponent {
    id: Option<String>,
    file: Option<String>,
    #[serde(default)]
    purpose: Option<String>,
    #[serde(default)]
    complexity: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

/// A parsed, field-validated spec document.
///
/// Dependency references are checked when the graph is built.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecDocument {
    pub metadata: SpecMetadata,
    pub components: Vec<Component>,
    /// SHA-256 of the source text, used to detect re-specification on resume
    pub source_hash: String,
}

impl SpecDocument {
    /// Parse spec text (YAML, or JSON as a YAML subset).
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let raw: RawDocument = serde_yaml::from_str(text).map_err(|e| ParseError::Syntax {
            message: e.to_string(),
        })?;

        let metadata = raw.metadata.unwrap_or_default();
        validate_metadata(&metadata)?;

        let raw_components = raw.components.ok_or_else(|| ParseError::MissingField {
            context: "spec document".to_string(),
            field: "components".to_string(),
        })?;

        let components = raw_components
            .into_iter()
            .enumerate()
            .map(|(index, raw)| raw.into_component(index))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            metadata,
            components,
            source_hash: hash_text(text),
        })
    }
}

impl RawComponent {
    fn into_component(self, index: usize) -> Result<Component, ParseError> {
        let id = non_blank(self.id).ok_or_else(|| ParseError::MissingField {
            context: format!("component #{}", index + 1),
            field: "id".to_string(),
        })?;
        let file = non_blank(self.file).ok_or_else(|| ParseError::MissingField {
            context: format!("component '{}'", id),
            field: "file".to_string(),
        })?;

        let complexity = match self.complexity {
            Some(value) => value
                .parse::<Complexity>()
                .map_err(|message| ParseError::InvalidValue {
                    context: format!("component '{}'", id),
                    field: "complexity".to_string(),
                    message,
                })?,
            None => Complexity::default(),
        };

        Ok(Component {
            id,
            file,
            purpose: self.purpose.unwrap_or_default(),
            complexity,
            depends_on: self.depends_on,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_metadata(metadata: &SpecMetadata) -> Result<(), ParseError> {
    if let Some(target) = metadata.coverage_target
        && !(0.0..=100.0).contains(&target)
    {
        return Err(ParseError::InvalidValue {
            context: "metadata".to_string(),
            field: "coverage_target".to_string(),
            message: format!("{} is outside 0..=100", target),
        });
    }
    if metadata.max_attempts == Some(0) {
        return Err(ParseError::InvalidValue {
            context: "metadata".to_string(),
            field: "max_attempts".to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// Hex-encoded SHA-256 of spec text.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"
metadata:
  coverage_target: 85
  max_attempts: 4
  reviewer_count: 2
components:
  - id: store
    file: src/store.rs
    purpose: Durable task log
    complexity: high
  - id: api
    file: src/api.rs
    depends_on: [store]
"#;

    #[test]
    fn test_parse_full_document() {
        let doc = SpecDocument::parse(SPEC).unwrap();
        assert_eq!(doc.metadata.coverage_target, Some(85.0));
        assert_eq!(doc.metadata.max_attempts, Some(4));
        assert_eq!(doc.metadata.reviewer_count, Some(2));
        assert_eq!(doc.components.len(), 2);
        assert_eq!(doc.components[0].complexity, Complexity::High);
        assert_eq!(doc.components[0].purpose, "Durable task log");
        assert_eq!(doc.components[1].depends_on, vec!["store".to_string()]);
    }

    #[test]
    fn test_complexity_defaults_to_medium() {
        let doc = SpecDocument::parse(SPEC).unwrap();
        assert_eq!(doc.components[1].complexity, Complexity::Medium);
    }

    #[test]
    fn test_parse_json_document() {
        let json = r#"{"components": [{"id": "a", "file": "a.rs", "depends_on": []}]}"#;
        let doc = SpecDocument::parse(json).unwrap();
        assert_eq!(doc.components[0].id, "a");
        assert_eq!(doc.metadata, SpecMetadata::default());
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let text = "components:\n  - file: a.rs\n";
        let err = SpecDocument::parse(text).unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingField {
                context: "component #1".to_string(),
                field: "id".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let text = "components:\n  - id: a\n";
        let err = SpecDocument::parse(text).unwrap_err();
        assert!(matches!(err, ParseError::MissingField { ref field, .. } if field == "file"));
    }

    #[test]
    fn test_blank_file_counts_as_missing() {
        let text = "components:\n  - id: a\n    file: \"  \"\n";
        let err = SpecDocument::parse(text).unwrap_err();
        assert!(matches!(err, ParseError::MissingField { .. }));
    }

    #[test]
    fn test_missing_components_list_is_rejected() {
        let err = SpecDocument::parse("metadata:\n  max_attempts: 2\n").unwrap_err();
        assert!(matches!(err, ParseError::MissingField { ref field, .. } if field == "components"));
    }

    #[test]
    fn test_invalid_complexity_is_rejected() {
        let text = "components:\n  - id: a\n    file: a.rs\n    complexity: extreme\n";
        let err = SpecDocument::parse(text).unwrap_err();
        assert!(err.to_string().contains("extreme"));
    }

    #[test]
    fn test_invalid_metadata_values() {
        let text = "metadata:\n  coverage_target: 140\ncomponents: []\n";
        assert!(matches!(
            SpecDocument::parse(text).unwrap_err(),
            ParseError::InvalidValue { .. }
        ));

        let text = "metadata:\n  max_attempts: 0\ncomponents: []\n";
        assert!(matches!(
            SpecDocument::parse(text).unwrap_err(),
            ParseError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_syntax_error() {
        let err = SpecDocument::parse("components: [unterminated").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn test_source_hash_is_stable() {
        let a = SpecDocument::parse(SPEC).unwrap();
        let b = SpecDocument::parse(SPEC).unwrap();
        assert_eq!(a.source_hash, b.source_hash);
        assert_eq!(a.source_hash.len(), 64);
    }

    #[test]
    fn test_complexity_from_str_roundtrip() {
        for c in [Complexity::Low, Complexity::Medium, Complexity::High] {
            assert_eq!(c.to_string().parse::<Complexity>().unwrap(), c);
        }
    }
}
