use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_BACKENDS_JSON: &str = include_str!("../../resources/backends.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    TryOn,
    GenerateImage,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TryOn => "try_on",
            Self::GenerateImage => "generate_image",
        }
    }
}

/// How a backend expects its arguments: by position in `inputs` order, or keyed
/// by parameter name and resolved against the endpoint's published signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallingConvention {
    Positional,
    Named,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    PersonImage,
    GarmentImage,
    GarmentType,
    Prompt,
    Width,
    Height,
    Literal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub from: InputSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub operation: Operation,
    /// Hugging Face Space id (`owner/space`) or an absolute base URL.
    pub target: String,
    pub api_name: String,
    pub convention: CallingConvention,
    pub inputs: Vec<InputSpec>,
    #[serde(default)]
    pub requires_garment_type: bool,
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default = "default_menu")]
    pub menu: bool,
}

fn default_menu() -> bool {
    true
}

impl BackendDescriptor {
    pub fn takes(&self, source: InputSource) -> bool {
        self.inputs.iter().any(|input| input.from == source)
    }
}

#[derive(Debug, Clone)]
pub struct BackendCatalog {
    backends: IndexMap<String, BackendDescriptor>,
}

impl BackendCatalog {
    pub fn new(descriptors: Vec<BackendDescriptor>) -> Result<Self> {
        let mut backends = IndexMap::new();
        for descriptor in descriptors {
            let key = descriptor.key.trim().to_string();
            if key.is_empty() {
                bail!("backend '{}' has an empty key", descriptor.name);
            }
            if backends.contains_key(&key) {
                bail!("duplicate backend key '{key}'");
            }
            backends.insert(key, descriptor);
        }
        let catalog = Self { backends };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_json(DEFAULT_BACKENDS_JSON).context("built-in backend table is invalid")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let descriptors: Vec<BackendDescriptor> =
            serde_json::from_str(raw).context("backend table is not valid JSON")?;
        Self::new(descriptors)
    }

    /// Loads `override_path` when given, the built-in table otherwise.
    pub fn load(override_path: Option<&Path>) -> Result<Self> {
        let Some(path) = override_path else {
            return Self::builtin();
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading backend table {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid backend table {}", path.display()))
    }

    pub fn get(&self, key: &str) -> Option<&BackendDescriptor> {
        self.backends.get(key)
    }

    pub fn list(&self) -> impl Iterator<Item = &BackendDescriptor> {
        self.backends.values()
    }

    pub fn by_operation(&self, operation: Operation) -> Vec<&BackendDescriptor> {
        self.backends
            .values()
            .filter(|backend| backend.operation == operation)
            .collect()
    }

    /// Backends offered to users in menus, in declaration order.
    pub fn menu(&self, operation: Operation) -> Vec<&BackendDescriptor> {
        self.by_operation(operation)
            .into_iter()
            .filter(|backend| backend.menu)
            .collect()
    }

    pub fn default_for(&self, operation: Operation) -> Option<&BackendDescriptor> {
        self.menu(operation)
            .first()
            .copied()
            .or_else(|| self.by_operation(operation).first().copied())
    }

    pub fn fallback_for(&self, key: &str) -> Option<&BackendDescriptor> {
        let backend = self.get(key)?;
        let fallback = backend.fallback.as_deref()?;
        self.get(fallback).filter(|alternate| alternate.key != backend.key)
    }

    fn validate(&self) -> Result<()> {
        for backend in self.backends.values() {
            if backend.api_name.trim().is_empty() {
                bail!("backend '{}' has no api_name", backend.key);
            }
            if backend.target.trim().is_empty() {
                bail!("backend '{}' has no target", backend.key);
            }
            let mut names = HashSet::new();
            for input in &backend.inputs {
                if !names.insert(input.name.as_str()) {
                    bail!(
                        "backend '{}' declares input '{}' twice",
                        backend.key,
                        input.name
                    );
                }
                if input.from == InputSource::Literal && input.value.is_none() {
                    bail!(
                        "backend '{}' literal input '{}' has no value",
                        backend.key,
                        input.name
                    );
                }
                let allowed = match backend.operation {
                    Operation::TryOn => matches!(
                        input.from,
                        InputSource::PersonImage
                            | InputSource::GarmentImage
                            | InputSource::GarmentType
                            | InputSource::Literal
                    ),
                    Operation::GenerateImage => matches!(
                        input.from,
                        InputSource::Prompt
                            | InputSource::Width
                            | InputSource::Height
                            | InputSource::Literal
                    ),
                };
                if !allowed {
                    bail!(
                        "backend '{}' input '{}' is not available for {}",
                        backend.key,
                        input.name,
                        backend.operation.as_str()
                    );
                }
            }
            match backend.operation {
                Operation::TryOn => {
                    if !backend.takes(InputSource::PersonImage)
                        || !backend.takes(InputSource::GarmentImage)
                    {
                        bail!(
                            "try-on backend '{}' must take both person and garment images",
                            backend.key
                        );
                    }
                    if backend.requires_garment_type != backend.takes(InputSource::GarmentType) {
                        bail!(
                            "backend '{}' garment-type requirement does not match its inputs",
                            backend.key
                        );
                    }
                }
                Operation::GenerateImage => {
                    if !backend.takes(InputSource::Prompt) {
                        bail!("generation backend '{}' must take a prompt", backend.key);
                    }
                    if backend.requires_garment_type {
                        bail!(
                            "generation backend '{}' cannot require a garment type",
                            backend.key
                        );
                    }
                }
            }
            if let Some(fallback) = backend.fallback.as_deref() {
                let Some(alternate) = self.backends.get(fallback) else {
                    bail!(
                        "backend '{}' falls back to unknown backend '{fallback}'",
                        backend.key
                    );
                };
                if alternate.operation != backend.operation {
                    bail!(
                        "backend '{}' falls back to '{fallback}' which serves {}",
                        backend.key,
                        alternate.operation.as_str()
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{BackendCatalog, CallingConvention, InputSource, Operation};

    #[test]
    fn builtin_catalog_loads_in_declaration_order() -> anyhow::Result<()> {
        let catalog = BackendCatalog::builtin()?;
        let keys: Vec<&str> = catalog.list().map(|backend| backend.key.as_str()).collect();
        assert_eq!(keys, vec!["g1_fast", "g1_pro", "g1_image", "g1_image_schnell"]);

        let tryon_menu: Vec<&str> = catalog
            .menu(Operation::TryOn)
            .into_iter()
            .map(|backend| backend.key.as_str())
            .collect();
        assert_eq!(tryon_menu, vec!["g1_fast", "g1_pro"]);
        assert_eq!(
            catalog
                .default_for(Operation::GenerateImage)
                .map(|backend| backend.key.as_str()),
            Some("g1_image")
        );
        Ok(())
    }

    #[test]
    fn builtin_catalog_declares_calling_conventions() -> anyhow::Result<()> {
        let catalog = BackendCatalog::builtin()?;
        let fast = catalog.get("g1_fast").ok_or_else(|| anyhow::anyhow!("g1_fast"))?;
        let pro = catalog.get("g1_pro").ok_or_else(|| anyhow::anyhow!("g1_pro"))?;
        assert_eq!(fast.convention, CallingConvention::Named);
        assert_eq!(pro.convention, CallingConvention::Positional);
        assert!(!fast.requires_garment_type);
        assert!(pro.requires_garment_type);
        assert!(pro.takes(InputSource::GarmentType));
        Ok(())
    }

    #[test]
    fn fallback_pairs_are_mutual() -> anyhow::Result<()> {
        let catalog = BackendCatalog::builtin()?;
        assert_eq!(
            catalog.fallback_for("g1_fast").map(|b| b.key.as_str()),
            Some("g1_pro")
        );
        assert_eq!(
            catalog.fallback_for("g1_pro").map(|b| b.key.as_str()),
            Some("g1_fast")
        );
        assert_eq!(
            catalog.fallback_for("g1_image").map(|b| b.key.as_str()),
            Some("g1_image_schnell")
        );
        assert!(catalog.fallback_for("missing").is_none());
        Ok(())
    }

    #[test]
    fn rejects_dangling_fallback() {
        let raw = r#"[{
            "key": "solo", "name": "Solo", "operation": "generate_image",
            "target": "owner/space", "api_name": "/infer", "convention": "positional",
            "inputs": [{"name": "prompt", "from": "prompt"}],
            "fallback": "ghost"
        }]"#;
        let err = BackendCatalog::from_json(raw).err().map(|err| err.to_string());
        assert_eq!(
            err.as_deref(),
            Some("backend 'solo' falls back to unknown backend 'ghost'")
        );
    }

    #[test]
    fn rejects_cross_operation_fallback() {
        let raw = r#"[
          {"key": "gen", "name": "Gen", "operation": "generate_image", "target": "a/b",
           "api_name": "/infer", "convention": "positional",
           "inputs": [{"name": "prompt", "from": "prompt"}], "fallback": "try"},
          {"key": "try", "name": "Try", "operation": "try_on", "target": "c/d",
           "api_name": "/run", "convention": "positional",
           "inputs": [{"name": "p", "from": "person_image"}, {"name": "g", "from": "garment_image"}]}
        ]"#;
        assert!(BackendCatalog::from_json(raw).is_err());
    }

    #[test]
    fn rejects_garment_requirement_mismatch() {
        let raw = r#"[{
            "key": "t", "name": "T", "operation": "try_on", "target": "a/b",
            "api_name": "/run", "convention": "positional",
            "inputs": [{"name": "p", "from": "person_image"}, {"name": "g", "from": "garment_image"}],
            "requires_garment_type": true
        }]"#;
        assert!(BackendCatalog::from_json(raw).is_err());
    }

    #[test]
    fn rejects_duplicate_keys_and_valueless_literals() {
        let duplicate = r#"[
          {"key": "x", "name": "X", "operation": "generate_image", "target": "a/b",
           "api_name": "/infer", "convention": "positional", "inputs": [{"name": "prompt", "from": "prompt"}]},
          {"key": "x", "name": "X2", "operation": "generate_image", "target": "a/c",
           "api_name": "/infer", "convention": "positional", "inputs": [{"name": "prompt", "from": "prompt"}]}
        ]"#;
        assert!(BackendCatalog::from_json(duplicate).is_err());

        let literal = r#"[{"key": "x", "name": "X", "operation": "generate_image", "target": "a/b",
           "api_name": "/infer", "convention": "named",
           "inputs": [{"name": "prompt", "from": "prompt"}, {"name": "seed", "from": "literal"}]}]"#;
        assert!(BackendCatalog::from_json(literal).is_err());
    }

    #[test]
    fn load_reads_override_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"[{{"key": "only", "name": "Only", "operation": "generate_image",
                 "target": "https://example.test", "api_name": "/predict",
                 "convention": "positional", "inputs": [{{"name": "prompt", "from": "prompt"}}]}}]"#
        )?;
        let catalog = BackendCatalog::load(Some(file.path()))?;
        assert_eq!(catalog.list().count(), 1);
        assert!(catalog.get("only").map(|b| b.menu).unwrap_or(false));
        assert!(catalog.by_operation(Operation::TryOn).is_empty());
        Ok(())
    }
}
