use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::Path;
use url::Url;

/// Name of the per-site manifest looked up in the site directory.
pub const MANIFEST_FILE: &str = "sitepush.toml";

#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub site: Site,
    pub upload: UploadTarget,
}

#[derive(Debug, Deserialize)]
pub struct Site {
    pub host: String,
    #[serde(default)]
    pub urls: Vec<Url>,
    #[serde(rename = "key-location")]
    pub key_location: Option<Url>,
}

#[derive(Debug, Deserialize)]
pub struct UploadTarget {
    pub host: String,
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(rename = "remote-dir")]
    pub remote_dir: String,
    #[serde(default)]
    pub files: Vec<String>,
}

fn default_port() -> u16 {
    22
}

impl Manifest {
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&manifest_path)
            .with_context(|| format!("Failed to read {}", MANIFEST_FILE))?;
        let manifest: Manifest = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", MANIFEST_FILE))?;
        Ok(Some(manifest))
    }
}

impl UploadTarget {
    /// Resolves the file list for one run. Names in `only` restrict the run
    /// to those manifest entries; manifest order is kept either way.
    pub fn selected_files(&self, only: &[String]) -> Result<Vec<String>> {
        if only.is_empty() {
            return Ok(self.files.clone());
        }

        for name in only {
            if !self.files.contains(name) {
                bail!(
                    "File '{}' is not listed in {} (known files: {})",
                    name,
                    MANIFEST_FILE,
                    self.files.join(", ")
                );
            }
        }

        Ok(self
            .files
            .iter()
            .filter(|f| only.contains(*f))
            .cloned()
            .collect())
    }
}
