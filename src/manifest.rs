//! Model manifest: category → list of source URLs.
//!
//! The manifest is a JSON object read from disk or fetched over HTTP. Keys
//! are model categories (directory names under `models/`), values are ordered
//! URL lists. Document order is preserved so downloads run in the order the
//! operator wrote them.
//!
//! ```json
//! {
//!     "checkpoints": ["https://huggingface.co/o/r/resolve/main/sdxl.safetensors"],
//!     "loras": []
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::DEFAULT_CATEGORIES;
use crate::fetcher::filename_from_url;
use crate::{Error, Result};

/// Where a manifest comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    Remote(String),
    Local(PathBuf),
}

impl ManifestSource {
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            ManifestSource::Remote(location.to_string())
        } else {
            ManifestSource::Local(PathBuf::from(location))
        }
    }
}

impl std::fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestSource::Remote(url) => write!(f, "{url}"),
            ManifestSource::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Value stored under one category.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestEntry {
    Urls(Vec<String>),
    /// Anything that is not a list; kept so callers can report it.
    Invalid(Value),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    entries: Vec<(String, ManifestEntry)>,
}

impl Manifest {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::ManifestUnavailable(
                "manifest must be a JSON object".into(),
            ));
        };

        let mut entries = Vec::with_capacity(map.len());
        for (category, value) in map {
            let entry = match value {
                Value::Array(items) => {
                    let mut urls = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::String(url) => urls.push(url),
                            other => warn!("Ignoring non-string entry {} in '{}'", other, category),
                        }
                    }
                    ManifestEntry::Urls(urls)
                }
                other => ManifestEntry::Invalid(other),
            };
            entries.push((category, entry));
        }
        Ok(Self { entries })
    }

    /// Every standard category with an empty URL list.
    pub fn empty_default() -> Self {
        Self {
            entries: DEFAULT_CATEGORIES
                .iter()
                .map(|c| (c.to_string(), ManifestEntry::Urls(Vec::new())))
                .collect(),
        }
    }

    pub fn push(&mut self, category: impl Into<String>, urls: Vec<String>) {
        self.entries.push((category.into(), ManifestEntry::Urls(urls)));
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, &ManifestEntry)> {
        self.entries.iter().map(|(c, e)| (c.as_str(), e))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of URLs across all list-valued categories.
    pub fn total_urls(&self) -> usize {
        self.categories()
            .map(|(_, entry)| match entry {
                ManifestEntry::Urls(urls) => urls.len(),
                ManifestEntry::Invalid(_) => 0,
            })
            .sum()
    }

    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (category, entry) in &self.entries {
            let value = match entry {
                ManifestEntry::Urls(urls) => {
                    Value::Array(urls.iter().cloned().map(Value::String).collect())
                }
                ManifestEntry::Invalid(v) => v.clone(),
            };
            map.insert(category.clone(), value);
        }
        Value::Object(map)
    }

    /// Pretty JSON with a 4-space indent.
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.to_value().serialize(&mut ser)?;
        String::from_utf8(buf).map_err(|e| Error::Config(format!("manifest is not UTF-8: {e}")))
    }

    /// Asset records for every URL, in manifest order.
    pub fn asset_records(&self, models_root: &Path) -> Vec<AssetRecord> {
        let mut out = Vec::new();
        for (category, entry) in self.categories() {
            if let ManifestEntry::Urls(urls) = entry {
                out.extend(
                    urls.iter()
                        .filter_map(|url| AssetRecord::new(category, url, models_root)),
                );
            }
        }
        out
    }
}

/// One configured asset, derived from a manifest URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetRecord {
    pub name: String,
    pub category: String,
    pub url: String,
    pub path: PathBuf,
}

impl AssetRecord {
    /// `None` when the URL has no usable final path segment.
    pub fn new(category: &str, url: &str, models_root: &Path) -> Option<Self> {
        let name = filename_from_url(url)?;
        Some(Self {
            path: models_root.join(category).join(&name),
            name,
            category: category.to_string(),
            url: url.to_string(),
        })
    }
}

/// Load a manifest from a URL or a local path.
pub async fn resolve(source: &ManifestSource) -> Result<Manifest> {
    let text = match source {
        ManifestSource::Remote(url) => fetch_remote(url).await.map_err(|e| {
            Error::ManifestUnavailable(format!("failed to fetch manifest from {url}: {e}"))
        })?,
        ManifestSource::Local(path) => fs::read_to_string(path).map_err(|e| {
            Error::ManifestUnavailable(format!("failed reading {}: {e}", path.display()))
        })?,
    };

    Manifest::from_json_str(&text).map_err(|e| match e {
        Error::ManifestUnavailable(msg) => {
            Error::ManifestUnavailable(format!("{msg} ({source})"))
        }
        other => Error::ManifestUnavailable(format!("invalid manifest {source}: {other}")),
    })
}

async fn fetch_remote(url: &str) -> Result<String> {
    let text = reqwest::get(url)
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(text)
}

/// Resolve `location`. Any failure falls back to the empty default manifest,
/// written to `default_path` so the operator has a file to fill in.
///
/// A malformed manifest sitting at `default_path` itself is left untouched
/// and the default is only used in memory.
pub async fn load_or_default(location: &str, default_path: &Path) -> Manifest {
    let source = ManifestSource::parse(location);
    match &source {
        ManifestSource::Remote(url) => info!("Using models manifest from URL: {}", url),
        ManifestSource::Local(path) if path.exists() => {
            info!("Using local models manifest: {}", path.display())
        }
        ManifestSource::Local(path) => {
            error!("Local models manifest not found at {}", path.display());
        }
    }

    let err = match resolve(&source).await {
        Ok(manifest) => return manifest,
        Err(e) => e,
    };
    error!("{}", err);

    let clobbers_source = matches!(&source, ManifestSource::Local(p) if p == default_path);
    if clobbers_source && default_path.exists() {
        warn!("Keeping {} as is", default_path.display());
    } else if let Err(e) = write_default(default_path) {
        error!("Failed writing default manifest to {}: {}", default_path.display(), e);
    }
    info!("Using default empty configuration");
    Manifest::empty_default()
}

fn write_default(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, Manifest::empty_default().to_json_pretty()?)?;
    Ok(())
}

/// True when `force` is set or no file named like the asset exists anywhere
/// under `models_root`.
pub fn needs_download(record: &AssetRecord, models_root: &Path, force: bool) -> bool {
    force || !exists_under(models_root, &record.name)
}

fn exists_under(root: &Path, filename: &str) -> bool {
    if !root.exists() {
        return false;
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .any(|entry| entry.file_type().is_file() && entry.file_name() == filename)
}

/// URLs whose files are absent under `models_root`.
///
/// Besides URL lists, a category holding a single URL string counts as one
/// asset. Only entries starting with `http` are checked.
pub fn missing_assets(manifest: &Manifest, models_root: &Path) -> Vec<String> {
    missing_in_value(&manifest.to_value(), models_root)
}

/// Like [`missing_assets`] for a raw config, which may also be a top-level
/// array of URLs.
pub fn missing_in_value(config: &Value, models_root: &Path) -> Vec<String> {
    let mut urls: Vec<&str> = Vec::new();
    match config {
        Value::Object(map) => {
            for entry in map.values() {
                match entry {
                    Value::Array(items) => urls.extend(items.iter().filter_map(Value::as_str)),
                    Value::String(url) => urls.push(url.as_str()),
                    _ => {}
                }
            }
        }
        Value::Array(items) => urls.extend(items.iter().filter_map(Value::as_str)),
        _ => warn!("Asset config is neither an object nor a list"),
    }

    let mut missing = Vec::new();
    for url in urls.into_iter().filter(|u| u.starts_with("http")) {
        let present = filename_from_url(url)
            .map(|name| exists_under(models_root, &name))
            .unwrap_or(false);
        if !present {
            info!("Missing model: {}", url);
            missing.push(url.to_string());
        }
    }
    missing
}

/// Read an asset config from disk and list what is missing under
/// `models_root`.
pub fn check_missing(config: &Path, models_root: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(config).map_err(|e| {
        Error::ManifestUnavailable(format!("failed reading {}: {e}", config.display()))
    })?;
    let value: Value = serde_json::from_str(&text).map_err(|e| {
        Error::ManifestUnavailable(format!("invalid asset config {}: {e}", config.display()))
    })?;
    Ok(missing_in_value(&value, models_root))
}
