//! Prompt-template library types the engine resolves commands against.
//!
//! Loading and hot-reloading the library from disk is an external
//! collaborator's job; the engine only consumes an in-memory catalog.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Declared argument kinds for validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    #[default]
    String,
    Number,
    Boolean,
}

/// Declared constraint set for one template argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub kind: ArgKind,
    #[serde(default)]
    pub max_len: Option<usize>,
    /// Regex the value must fully match.
    #[serde(default)]
    pub pattern: Option<String>,
}

impl ArgSpec {
    pub fn required(name: &str) -> Self {
        Self {
            name: name.to_string(),
            required: true,
            kind: ArgKind::String,
            max_len: None,
            pattern: None,
        }
    }

    pub fn optional(name: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name)
        }
    }
}

/// One reusable instruction template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDefinition {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    /// System text prepended to the rendered step, when present.
    #[serde(default)]
    pub system_message: Option<String>,
    /// User-message template; `{{ previous_message }}` is the reserved
    /// carry-forward variable filled by the renderer.
    pub user_message_template: String,
    #[serde(default)]
    pub arguments: Vec<ArgSpec>,
    /// Gate ids this template explicitly opts into (template tier).
    #[serde(default)]
    pub gate_includes: Vec<String>,
    /// Gate ids removed from the resolved bundle regardless of tier.
    #[serde(default)]
    pub gate_excludes: Vec<String>,
}

/// In-memory prompt library with id and case-insensitive name resolution.
#[derive(Debug, Clone, Default)]
pub struct PromptCatalog {
    prompts: HashMap<String, PromptDefinition>,
    /// Lowercased name → id aliases.
    aliases: HashMap<String, String>,
}

impl PromptCatalog {
    pub fn new(definitions: Vec<PromptDefinition>) -> Self {
        let mut catalog = Self::default();
        for def in definitions {
            catalog.insert(def);
        }
        catalog
    }

    /// Insert a definition, replacing any previous one with the same id.
    pub fn insert(&mut self, def: PromptDefinition) {
        self.aliases.insert(def.name.to_lowercase(), def.id.clone());
        self.prompts.insert(def.id.clone(), def);
    }

    /// Resolve a reference: exact id first, then case-insensitive name alias.
    pub fn resolve(&self, reference: &str) -> Option<&PromptDefinition> {
        if let Some(def) = self.prompts.get(reference) {
            return Some(def);
        }
        let id = self.aliases.get(&reference.to_lowercase())?;
        self.prompts.get(id)
    }

    pub fn get(&self, id: &str) -> Option<&PromptDefinition> {
        self.prompts.get(id)
    }

    /// All known ids, sorted for deterministic suggestion ranking.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.prompts.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Load a catalog from a JSON array of definitions.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read catalog {}", path.display()))?;
        let definitions: Vec<PromptDefinition> = serde_json::from_str(&contents)
            .with_context(|| format!("parse catalog {}", path.display()))?;
        Ok(Self::new(definitions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(id: &str, name: &str) -> PromptDefinition {
        PromptDefinition {
            id: id.to_string(),
            name: name.to_string(),
            category: "general".to_string(),
            description: String::new(),
            system_message: None,
            user_message_template: "do {{ task }}".to_string(),
            arguments: Vec::new(),
            gate_includes: Vec::new(),
            gate_excludes: Vec::new(),
        }
    }

    #[test]
    fn resolves_by_id_and_name_alias() {
        let catalog = PromptCatalog::new(vec![def("research", "Deep Research")]);
        assert!(catalog.resolve("research").is_some());
        assert!(catalog.resolve("deep research").is_some());
        assert!(catalog.resolve("DEEP RESEARCH").is_some());
        assert!(catalog.resolve("missing").is_none());
    }

    #[test]
    fn ids_are_sorted() {
        let catalog = PromptCatalog::new(vec![def("b", "B"), def("a", "A")]);
        assert_eq!(catalog.ids(), vec!["a", "b"]);
    }

    #[test]
    fn load_rejects_malformed_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("catalog.json");
        fs::write(&path, "{not json").expect("write");
        assert!(PromptCatalog::load(&path).is_err());
    }
}
