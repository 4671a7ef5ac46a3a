//! comfy-provision: model provisioning and log tailing for a ComfyUI workspace
//!
//! Downloads the model assets listed in a JSON manifest into the host app's
//! `models/` tree through an external download accelerator, lists what is
//! installed, and keeps a bounded in-memory tail of the host app's log.
//!
//! # Key Features
//!
//! - **Idempotent batches**: assets already on disk are skipped unless forced
//! - **Provider adapters**: HuggingFace, Civitai (token) and Google Drive links
//! - **Log tail**: seed, follow and HTML-render the log with severity classes
//! - **Output export**: zip the generated `output/` tree for download
//!
//! # Example: Download Batch
//!
//! ```no_run
//! use std::sync::Arc;
//! use comfy_provision::config::Settings;
//! use comfy_provision::fetcher::AcceleratorFetcher;
//! use comfy_provision::orchestrator::run_from_settings;
//!
//! #[tokio::main]
//! async fn main() -> comfy_provision::Result<()> {
//!     let settings = Settings::from_env();
//!     let fetcher = Arc::new(AcceleratorFetcher::new(settings.accelerator_bin.clone()));
//!
//!     if let Some(report) = run_from_settings(&settings, fetcher).await {
//!         println!("{} downloaded, {} failed", report.succeeded(), report.failed());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fetcher;
pub mod inspect;
pub mod logtail;
pub mod manifest;
pub mod orchestrator;
pub mod outputs;

// Re-exports for convenience
pub use error::{Error, Result};

// Prelude for common imports
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::error::{Error, Result};
    pub use crate::fetcher::{AcceleratorFetcher, Fetcher, Outcome, Provider};
    pub use crate::logtail::{LogBuffer, LogTailer};
    pub use crate::manifest::{Manifest, ManifestSource};
    pub use crate::orchestrator::{BatchReport, Orchestrator};
}
