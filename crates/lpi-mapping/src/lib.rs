//! Skill reconciliation, profile mapping, and fixture-backed mock profiles for LPI.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use lpi_core::{extract_subject_key, ExternalProfile};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::info;

mod mapper;
mod reconcile;

pub use mapper::{
    default_availability, infer_category, infer_certifications, infer_languages, map_education,
    map_work_history, placeholder_date_of_birth, MappedProfile, ProfileMapper, LANGUAGES,
};
pub use reconcile::SkillReconciler;

pub const CRATE_NAME: &str = "lpi-mapping";

#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    profiles: Vec<CatalogEntry>,
    #[serde(default)]
    default_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogEntry {
    subject_key: String,
    file: String,
}

/// Static mock profiles keyed by subject key, for testing and offline runs.
#[derive(Debug, Clone, Default)]
pub struct FixtureCatalog {
    profiles: HashMap<String, ExternalProfile>,
    default_profile: Option<ExternalProfile>,
}

impl FixtureCatalog {
    /// Load `catalog.yaml` and the JSON payloads it references from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let catalog_path = dir.join("catalog.yaml");
        let text = fs::read_to_string(&catalog_path)
            .with_context(|| format!("reading {}", catalog_path.display()))?;
        let catalog: CatalogFile = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing {}", catalog_path.display()))?;

        let mut profiles = HashMap::with_capacity(catalog.profiles.len());
        for entry in &catalog.profiles {
            let profile = read_profile_json(&dir.join(&entry.file))?;
            profiles.insert(entry.subject_key.to_ascii_lowercase(), profile);
        }
        let default_profile = catalog
            .default_file
            .as_deref()
            .map(|file| read_profile_json(&dir.join(file)))
            .transpose()?;

        info!(
            fixtures = profiles.len(),
            has_default = default_profile.is_some(),
            dir = %dir.display(),
            "loaded fixture catalog"
        );
        Ok(Self {
            profiles,
            default_profile,
        })
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = (String, ExternalProfile)>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|(key, profile)| (key.to_ascii_lowercase(), profile))
                .collect(),
            default_profile: None,
        }
    }

    pub fn with_default(mut self, profile: ExternalProfile) -> Self {
        self.default_profile = Some(profile);
        self
    }

    /// Fixture for the subject, else the catalog default, else none.
    pub fn lookup(&self, subject_url: &str) -> Option<&ExternalProfile> {
        self.profiles
            .get(&extract_subject_key(subject_url))
            .or(self.default_profile.as_ref())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty() && self.default_profile.is_none()
    }
}

fn read_profile_json(path: &Path) -> Result<ExternalProfile> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: JsonValue =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    Ok(ExternalProfile::from_json(&value))
}
