use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Rough cost ordering for catalog entries; smaller classes load faster and
/// should come first so something becomes usable quickly.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Tiny,
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Tiny => "tiny",
            SizeClass::Small => "small",
            SizeClass::Medium => "medium",
            SizeClass::Large => "large",
        }
    }
}

/// Static metadata for one loadable model. Defined at process start and
/// never mutated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub size_class: SizeClass,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog io error: {0}")]
    Io(String),
    #[error("catalog parse error: {0}")]
    Parse(String),
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

/// Immutable, ordered list of loadable models. Order is load order: the
/// catalog author puts the cheapest entry first.
#[derive(Clone, Debug)]
pub struct ModelCatalog {
    entries: Vec<ModelDescriptor>,
}

const ENV_CATALOG_FILE: &str = "HEARTH_CATALOG_FILE";
const MANIFEST_VERSION: u32 = 1;

#[derive(Deserialize)]
struct CatalogManifest {
    version: Option<u32>,
    #[serde(default)]
    models: Vec<ManifestEntry>,
}

#[derive(Deserialize)]
struct ManifestEntry {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    size: SizeClass,
}

impl ModelCatalog {
    pub fn new(entries: Vec<ModelDescriptor>) -> Result<Self, CatalogError> {
        if entries.is_empty() {
            return Err(CatalogError::Invalid("catalog has no entries".into()));
        }
        for (idx, entry) in entries.iter().enumerate() {
            if entry.id.trim().is_empty() {
                return Err(CatalogError::Invalid(format!("entry {idx} has an empty id")));
            }
            if entries[..idx].iter().any(|other| other.id == entry.id) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate model id `{}`",
                    entry.id
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Built-in default catalog, smallest first.
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                ModelDescriptor {
                    id: "SmolLM2-360M-Instruct-q4f16_1-MLC".into(),
                    display_name: "SmolLM2 360M (Fastest)".into(),
                    description: "Ultra-compact model for simple tasks, fastest loading".into(),
                    size_class: SizeClass::Tiny,
                },
                ModelDescriptor {
                    id: "Qwen2.5-0.5B-Instruct-q4f16_1-MLC".into(),
                    display_name: "Qwen2.5 0.5B".into(),
                    description: "Small but capable model with good performance".into(),
                    size_class: SizeClass::Small,
                },
            ],
        }
    }

    pub fn from_manifest_str(raw: &str) -> Result<Self, CatalogError> {
        let manifest: CatalogManifest =
            toml::from_str(raw).map_err(|err| CatalogError::Parse(err.to_string()))?;
        if let Some(version) = manifest.version {
            if version != MANIFEST_VERSION {
                warn!(
                    target: "hearth::engine",
                    version,
                    "unsupported catalog manifest version; attempting to read anyway"
                );
            }
        }
        let entries = manifest
            .models
            .into_iter()
            .map(|entry| ModelDescriptor {
                id: entry.id,
                display_name: entry.name,
                description: entry.description,
                size_class: entry.size,
            })
            .collect();
        Self::new(entries)
    }

    /// Resolve the catalog for this process: the manifest named by
    /// `HEARTH_CATALOG_FILE` when set, the built-in list otherwise.
    pub fn load() -> Result<Self, CatalogError> {
        match std::env::var(ENV_CATALOG_FILE) {
            Ok(path) if !path.trim().is_empty() => {
                let raw = std::fs::read_to_string(path.trim())
                    .map_err(|err| CatalogError::Io(err.to_string()))?;
                let catalog = Self::from_manifest_str(&raw)?;
                info!(
                    target: "hearth::engine",
                    path = %path.trim(),
                    models = catalog.len(),
                    "catalog loaded from manifest"
                );
                Ok(catalog)
            }
            _ => Ok(Self::builtin()),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
