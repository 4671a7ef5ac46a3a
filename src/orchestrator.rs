//! Batch download orchestration.
//!
//! Walks a [`Manifest`] in document order and hands every missing asset to a
//! [`Fetcher`]. Individual failures are recorded and the batch carries on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::fetcher::{filename_from_url, Fetcher, Outcome, Provider};
use crate::manifest::{self, Manifest, ManifestEntry};

/// Summary of one orchestrator run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// URLs found in list-valued categories.
    pub scheduled: usize,
    /// URLs whose file already existed in its category directory.
    pub skipped: Vec<String>,
    /// One outcome per attempted fetch, in manifest order.
    pub outcomes: Vec<Outcome>,
    /// Categories whose value was not a list.
    pub invalid_categories: Vec<String>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

pub struct Orchestrator {
    models_root: PathBuf,
    fetcher: Arc<dyn Fetcher>,
}

impl Orchestrator {
    pub fn new(models_root: impl Into<PathBuf>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            models_root: models_root.into(),
            fetcher,
        }
    }

    pub fn models_root(&self) -> &Path {
        &self.models_root
    }

    pub async fn run(&self, manifest: &Manifest, force: bool) -> BatchReport {
        let mut report = BatchReport {
            scheduled: manifest.total_urls(),
            ..Default::default()
        };

        info!("Found {} models in configuration", report.scheduled);
        for (category, entry) in manifest.categories() {
            if let ManifestEntry::Urls(urls) = entry {
                if !urls.is_empty() {
                    info!("  {}: {}", category, urls.len());
                }
            }
        }

        for (category, entry) in manifest.categories() {
            let urls = match entry {
                ManifestEntry::Urls(urls) => urls,
                ManifestEntry::Invalid(_) => {
                    warn!("Skipping '{}' as it's not a list of URLs", category);
                    report.invalid_categories.push(category.to_string());
                    continue;
                }
            };

            let category_dir = self.models_root.join(category);
            if let Err(e) = tokio::fs::create_dir_all(&category_dir).await {
                error!("Cannot create {}: {}", category_dir.display(), e);
                report.outcomes.extend(urls.iter().map(|url| {
                    Outcome::failed(
                        url.clone(),
                        format!("cannot create {}: {e}", category_dir.display()),
                    )
                }));
                continue;
            }

            for url in urls {
                let Some(filename) = filename_from_url(url) else {
                    error!("Cannot derive a filename from {}", url);
                    report
                        .outcomes
                        .push(Outcome::failed(url.clone(), "cannot derive filename from URL"));
                    continue;
                };

                if !force && category_dir.join(&filename).exists() {
                    info!("Skipping {}, file already exists", filename);
                    report.skipped.push(url.clone());
                    continue;
                }

                info!("Downloading {} to {}", filename, category_dir.display());
                let outcome = self.fetcher.fetch(url, &category_dir, &Provider::Direct).await;
                report.outcomes.push(outcome);
            }
        }

        report
    }
}

/// Whether the environment allows a batch to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preflight {
    Ready,
    Skipped(String),
}

/// Check the skip flag and that the host app is installed far enough to
/// receive models.
pub fn preflight(settings: &Settings) -> Preflight {
    if settings.skip_download {
        return Preflight::Skipped(
            "model download skipped due to SKIP_MODEL_DOWNLOAD=true".to_string(),
        );
    }

    if !settings.app_dir.join("main.py").exists() {
        return Preflight::Skipped(format!(
            "{} not found, skipping model downloads until the app is installed",
            settings.app_dir.join("main.py").display()
        ));
    }

    let models = settings.models_dir();
    for dir in [models.clone(), models.join("checkpoints"), models.join("loras")] {
        if !dir.is_dir() {
            return Preflight::Skipped(format!(
                "model directory {} not found, skipping model downloads",
                dir.display()
            ));
        }
    }

    Preflight::Ready
}

/// Environment-driven batch: preflight, resolve the manifest, download.
///
/// Returns `None` when preflight decided not to run. An unavailable manifest
/// degrades to the empty default, so this never fails.
pub async fn run_from_settings(
    settings: &Settings,
    fetcher: Arc<dyn Fetcher>,
) -> Option<BatchReport> {
    if let Preflight::Skipped(reason) = preflight(settings) {
        info!("{}", reason);
        return None;
    }

    let manifest =
        manifest::load_or_default(&settings.manifest_location, &settings.default_manifest_path)
            .await;

    let started = Instant::now();
    let orchestrator = Orchestrator::new(settings.models_dir(), fetcher);
    let report = orchestrator.run(&manifest, settings.force_download).await;

    info!(
        "Download batch finished in {}: {} succeeded, {} failed, {} skipped",
        humantime::format_duration(Duration::from_secs(started.elapsed().as_secs())),
        report.succeeded(),
        report.failed(),
        report.skipped.len()
    );
    Some(report)
}
