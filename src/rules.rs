//! Rule profiles and rule resolution
//!
//! A rule profile is a named, ordered set of rule documents. Resolving a
//! profile concatenates its documents into the rule text handed to the
//! compliance stage. A profile that resolves to nothing is an error: the
//! compliance check cannot run without rules.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while resolving rules
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Rule profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Rule profile '{0}' has no rule text")]
    Empty(String),

    #[error("Cannot read rule document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a rule document's text comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleSource {
    /// A file, relative paths taken from the library's base directory
    Path { path: PathBuf },
    /// Inline text
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDocument {
    pub title: String,
    #[serde(flatten)]
    pub source: RuleSource,
}

impl RuleDocument {
    pub fn inline(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source: RuleSource::Text { text: text.into() },
        }
    }

    pub fn file(title: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            title: title.into(),
            source: RuleSource::Path { path: path.into() },
        }
    }
}

/// Named, ordered set of rule documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleProfile {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub documents: Vec<RuleDocument>,
}

impl RuleProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            documents: Vec::new(),
        }
    }

    pub fn with_document(mut self, document: RuleDocument) -> Self {
        self.documents.push(document);
        self
    }
}

/// Resolves a profile ID to concatenated rule text
#[async_trait]
pub trait RuleResolver: Send + Sync {
    async fn resolve(&self, profile_id: &str) -> Result<String, RuleError>;
}

/// In-memory library of rule profiles
#[derive(Debug, Default)]
pub struct ProfileLibrary {
    profiles: DashMap<String, RuleProfile>,
    base_dir: Option<PathBuf>,
}

impl ProfileLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library whose relative document paths resolve against `dir`
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = RuleProfile>) -> Self {
        let library = Self::new();
        for profile in profiles {
            library.insert(profile);
        }
        library
    }

    /// Add or replace a profile; returns the replaced one
    pub fn insert(&self, profile: RuleProfile) -> Option<RuleProfile> {
        self.profiles.insert(profile.id.clone(), profile)
    }

    pub fn get(&self, id: &str) -> Option<RuleProfile> {
        self.profiles.get(id).map(|r| r.clone())
    }

    pub fn remove(&self, id: &str) -> Option<RuleProfile> {
        self.profiles.remove(id).map(|(_, p)| p)
    }

    /// All profiles sorted by ID
    pub fn list(&self) -> Vec<RuleProfile> {
        let mut profiles: Vec<RuleProfile> = self.profiles.iter().map(|r| r.clone()).collect();
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    async fn document_text(&self, document: &RuleDocument) -> Result<String, RuleError> {
        match &document.source {
            RuleSource::Text { text } => Ok(text.clone()),
            RuleSource::Path { path } => {
                let path = self.resolve_path(path);
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|source| RuleError::Io { path, source })
            }
        }
    }
}

#[async_trait]
impl RuleResolver for ProfileLibrary {
    /// Concatenate the profile's documents in order, each under a
    /// `## <title>` heading. Blank documents are skipped.
    async fn resolve(&self, profile_id: &str) -> Result<String, RuleError> {
        let profile = self
            .get(profile_id)
            .ok_or_else(|| RuleError::ProfileNotFound(profile_id.to_string()))?;

        let mut rules = String::new();
        for document in &profile.documents {
            let text = self.document_text(document).await?;
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if !rules.is_empty() {
                rules.push_str("\n\n");
            }
            rules.push_str("## ");
            rules.push_str(&document.title);
            rules.push_str("\n\n");
            rules.push_str(text);
        }

        if rules.is_empty() {
            return Err(RuleError::Empty(profile_id.to_string()));
        }
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn concatenates_documents_in_order() {
        let library = ProfileLibrary::from_profiles([RuleProfile::new("house", "House style")
            .with_document(RuleDocument::inline("Numbers", "Use numerals for 10 and above."))
            .with_document(RuleDocument::inline("Blank", "   "))
            .with_document(RuleDocument::inline("Spelling", "Use British spelling."))]);

        let rules = library.resolve("house").await.unwrap();
        assert_eq!(
            rules,
            "## Numbers\n\nUse numerals for 10 and above.\n\n## Spelling\n\nUse British spelling."
        );
    }

    #[tokio::test]
    async fn reads_relative_paths_from_base_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("style.md"), "Oxford comma.\n").unwrap();

        let library = ProfileLibrary::new().with_base_dir(dir.path());
        library.insert(
            RuleProfile::new("press", "Press").with_document(RuleDocument::file("Style", "style.md")),
        );

        let rules = library.resolve("press").await.unwrap();
        assert!(rules.ends_with("Oxford comma."));
    }

    #[tokio::test]
    async fn empty_and_unknown_profiles_are_errors() {
        let library = ProfileLibrary::from_profiles([RuleProfile::new("empty", "Empty")]);

        assert!(matches!(library.resolve("empty").await, Err(RuleError::Empty(_))));
        assert!(matches!(
            library.resolve("nope").await,
            Err(RuleError::ProfileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_rule_file_is_io_error() {
        let library = ProfileLibrary::from_profiles([RuleProfile::new("p", "P")
            .with_document(RuleDocument::file("Gone", "/nonexistent/folio/rules.md"))]);
        assert!(matches!(library.resolve("p").await, Err(RuleError::Io { .. })));
    }

    #[test]
    fn documents_deserialize_from_path_or_text() {
        let yaml = "id: house\nname: House\ndocuments:\n  - title: A\n    path: a.md\n  - title: B\n    text: inline\n";
        let profile: RuleProfile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(profile.documents[0], RuleDocument::file("A", "a.md"));
        assert_eq!(profile.documents[1], RuleDocument::inline("B", "inline"));
    }
}
