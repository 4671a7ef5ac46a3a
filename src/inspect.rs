//! Read-side views of what is installed.
//!
//! Custom nodes are discovered by scanning the provisioning script for
//! `git clone` directives; models are listed from the manifest. Neither view
//! touches the network and both degrade to an empty result when their source
//! file is missing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::config::Settings;
use crate::fetcher::filename_from_url;
use crate::manifest::{Manifest, ManifestEntry};
use crate::{Error, Result};

/// A custom node repository cloned by the provisioning script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomNode {
    pub name: String,
    pub path: PathBuf,
    pub url: String,
}

/// A model configured in the manifest. Presence on disk is not checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledModel {
    pub name: String,
    pub path: PathBuf,
    pub url: String,
}

/// Extracts repository URLs from some text source.
pub trait NodeSource {
    fn repositories(&self, text: &str) -> Vec<String>;
}

/// Matches `git clone --depth=1 <url>` (or `--depth 1`) lines.
pub struct CloneDirectiveSource;

impl CloneDirectiveSource {
    fn pattern() -> &'static Regex {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        PATTERN.get_or_init(|| {
            Regex::new(r"git\s+clone\s+--depth[=\s]\d+\s+(https?://[^\s'\x22;)&|]+)")
                .expect("clone directive pattern is valid")
        })
    }
}

impl NodeSource for CloneDirectiveSource {
    fn repositories(&self, text: &str) -> Vec<String> {
        Self::pattern()
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }
}

/// Display name of a repository: last path segment without `.git`.
pub fn repo_name(url: &str) -> Option<String> {
    let last = url.trim_end_matches('/').rsplit('/').next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    (!name.is_empty()).then(|| name.to_string())
}

/// Parse custom nodes out of script text, sorted case-insensitively by name.
pub fn parse_custom_nodes(
    source: &dyn NodeSource,
    text: &str,
    custom_nodes_dir: &Path,
) -> Vec<CustomNode> {
    let mut nodes: Vec<CustomNode> = source
        .repositories(text)
        .into_iter()
        .filter_map(|url| {
            let name = repo_name(&url)?;
            Some(CustomNode {
                path: custom_nodes_dir.join(&name),
                name,
                url,
            })
        })
        .collect();
    nodes.sort_by_key(|n| n.name.to_lowercase());
    nodes
}

/// Custom nodes declared by the first provisioning script found.
pub fn installed_custom_nodes(settings: &Settings) -> Vec<CustomNode> {
    match read_first(&settings.start_script_candidates()) {
        Ok((_, text)) => {
            parse_custom_nodes(&CloneDirectiveSource, &text, &settings.custom_nodes_dir())
        }
        Err(e) => {
            warn!("Provisioning script not found: {}", e);
            Vec::new()
        }
    }
}

/// Group manifest URLs by category, categories and entries sorted by name.
/// Empty and non-list categories are left out.
pub fn list_models(manifest: &Manifest, models_dir: &Path) -> BTreeMap<String, Vec<InstalledModel>> {
    let mut out = BTreeMap::new();
    for (category, entry) in manifest.categories() {
        let ManifestEntry::Urls(urls) = entry else {
            continue;
        };
        let mut models: Vec<InstalledModel> = urls
            .iter()
            .filter_map(|url| {
                let name = filename_from_url(url)?;
                Some(InstalledModel {
                    path: models_dir.join(category).join(&name),
                    name,
                    url: url.clone(),
                })
            })
            .collect();
        if models.is_empty() {
            continue;
        }
        models.sort_by_key(|m| m.name.to_lowercase());
        out.insert(category.to_string(), models);
    }
    out
}

/// Models configured in the first manifest found.
pub fn installed_models(settings: &Settings) -> BTreeMap<String, Vec<InstalledModel>> {
    let manifest = read_first(&settings.manifest_candidates()).and_then(|(path, text)| {
        Manifest::from_json_str(&text).map_err(|e| {
            Error::InspectionUnavailable(format!("invalid manifest {}: {e}", path.display()))
        })
    });

    match manifest {
        Ok(manifest) => {
            let models_dir = settings.models_dir();
            if !models_dir.exists() {
                warn!(
                    "{} doesn't exist yet, showing models from config only",
                    models_dir.display()
                );
            }
            list_models(&manifest, &models_dir)
        }
        Err(e) => {
            warn!("Models manifest unavailable: {}", e);
            BTreeMap::new()
        }
    }
}

fn read_first(candidates: &[PathBuf]) -> Result<(PathBuf, String)> {
    for path in candidates {
        if path.is_file() {
            let text = fs::read_to_string(path).map_err(|e| {
                Error::InspectionUnavailable(format!("failed reading {}: {e}", path.display()))
            })?;
            return Ok((path.clone(), text));
        }
    }
    let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
    Err(Error::InspectionUnavailable(format!(
        "none of [{}] exist",
        tried.join(", ")
    )))
}
