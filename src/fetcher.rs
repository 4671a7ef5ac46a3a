//! Asset fetching through an external download accelerator.
//!
//! Every download is delegated to `aria2c` (or a compatible binary) with a
//! fixed reliability profile: 16 connections and segments, 1 MiB minimum
//! split, 5 tries spaced 10 s apart, 30 s connect timeout, 600 s stall
//! timeout, no pre-allocation and continue-on-partial.
//!
//! The fetcher never fails past its boundary: spawn errors and non-zero exits
//! both come back as an [`Outcome`] with `success == false`.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use comfy_provision::fetcher::{AcceleratorFetcher, Fetcher, Provider};
//!
//! # async fn demo() {
//! let fetcher = AcceleratorFetcher::new("aria2c");
//! let outcome = fetcher
//!     .fetch(
//!         "https://huggingface.co/org/repo/resolve/main/model.safetensors",
//!         Path::new("/workspace/ComfyUI/models/checkpoints"),
//!         &Provider::HuggingFace,
//!     )
//!     .await;
//! println!("{}: {}", outcome.success, outcome.message);
//! # }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{error, info};

const DRIVE_DOWNLOAD_URL: &str = "https://drive.google.com/uc";

/// Result of one fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub url: String,
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn succeeded(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            success: true,
            message: "Download completed successfully".to_string(),
        }
    }

    pub fn failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            success: false,
            message: message.into(),
        }
    }

    /// `Err(FetchFailed)` carrying the diagnostic when the attempt failed.
    pub fn check(&self) -> crate::Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(crate::Error::FetchFailed(format!("{}: {}", self.url, self.message)))
        }
    }
}

/// Hosting provider and its per-provider options.
#[derive(Debug, Clone)]
pub enum Provider {
    /// Plain URL, saved under its last path segment.
    Direct,
    /// Hugging Face `resolve/` URL, saved under its last path segment.
    HuggingFace,
    /// Civitai download URL. The server names the file; the optional API
    /// token is appended as a `token` query parameter.
    Civitai { token: Option<SecretString> },
    /// Google Drive share link, `uc?id=` link or bare file id.
    GoogleDrive { filename: Option<String> },
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Direct => "direct",
            Provider::HuggingFace => "huggingface",
            Provider::Civitai { .. } => "civitai",
            Provider::GoogleDrive { .. } => "googledrive",
        }
    }

    /// The URL handed to the accelerator and the explicit output filename, if any.
    pub fn resolve(&self, url: &str) -> (String, Option<String>) {
        match self {
            Provider::Direct | Provider::HuggingFace => (url.to_string(), filename_from_url(url)),
            Provider::Civitai { token } => {
                let download_url = match token {
                    Some(token) if !token.expose_secret().is_empty() => {
                        with_query_param(url, "token", token.expose_secret())
                    }
                    _ => url.to_string(),
                };
                (download_url, None)
            }
            Provider::GoogleDrive { filename } => {
                let id = drive_file_id(url);
                let download_url = format!("{DRIVE_DOWNLOAD_URL}?export=download&id={id}");
                let filename = filename
                    .as_deref()
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(ToString::to_string);
                (download_url, filename)
            }
        }
    }
}

/// Something that can retrieve one URL into a directory.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, destination_dir: &Path, provider: &Provider) -> Outcome;
}

/// [`Fetcher`] backed by an external accelerator process.
pub struct AcceleratorFetcher {
    program: String,
    /// Per-destination locks; concurrent fetches of the same file queue up.
    in_flight: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl AcceleratorFetcher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn destination_lock(&self, key: PathBuf) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key).or_default().clone()
    }

    fn release_destination(&self, key: &Path) {
        let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        // Nobody else is waiting once the map holds the only reference.
        if map.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(key);
        }
    }

    async fn run(&self, download_url: &str, destination_dir: &Path, filename: Option<&str>) -> Outcome {
        if let Err(e) = tokio::fs::create_dir_all(destination_dir).await {
            return Outcome::failed(
                download_url,
                format!("Error during download: cannot create {}: {e}", destination_dir.display()),
            );
        }

        let args = accelerator_args(download_url, destination_dir, filename);
        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => Outcome::succeeded(download_url),
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                let diagnostic = if stderr.trim().is_empty() {
                    String::from_utf8_lossy(&out.stdout).into_owned()
                } else {
                    stderr.into_owned()
                };
                Outcome::failed(download_url, format!("Download failed: {}", diagnostic.trim()))
            }
            Err(e) => Outcome::failed(download_url, format!("Error during download: {e}")),
        }
    }
}

#[async_trait]
impl Fetcher for AcceleratorFetcher {
    async fn fetch(&self, url: &str, destination_dir: &Path, provider: &Provider) -> Outcome {
        let (download_url, filename) = provider.resolve(url);
        let label = filename.clone().unwrap_or_else(|| url.to_string());
        info!("Starting {} download of {} into {}", provider.name(), label, destination_dir.display());

        let key = match &filename {
            Some(name) => destination_dir.join(name),
            None => destination_dir.join(url),
        };
        let lock = self.destination_lock(key.clone());
        let mut outcome = {
            let _guard = lock.lock().await;
            self.run(&download_url, destination_dir, filename.as_deref()).await
        };
        drop(lock);
        self.release_destination(&key);

        // Report against the caller's URL so tokens never leak into outcomes.
        outcome.url = url.to_string();
        if outcome.success {
            info!("Successfully downloaded {}", label);
        } else {
            error!("Failed to download {}: {}", label, outcome.message);
        }
        outcome
    }
}

/// Full accelerator argument list for one download.
pub fn accelerator_args(url: &str, destination_dir: &Path, filename: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = [
        "--console-log-level=warn",
        "-c",
        "-x",
        "16",
        "-s",
        "16",
        "-k",
        "1M",
        "--file-allocation=none",
        "--optimize-concurrent-downloads=true",
        "--max-connection-per-server=16",
        "--min-split-size=1M",
        "--max-tries=5",
        "--retry-wait=10",
        "--connect-timeout=30",
        "--timeout=600",
        "--summary-interval=30",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.push(url.to_string());
    args.push("-d".to_string());
    args.push(destination_dir.display().to_string());
    if let Some(name) = filename {
        args.push("-o".to_string());
        args.push(name.to_string());
    }
    args
}

/// Last path segment of a URL, without query string or fragment.
pub fn filename_from_url(url: &str) -> Option<String> {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(ToString::to_string),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .map(ToString::to_string),
    };
    segment.filter(|s| !s.is_empty())
}

/// Extract a Google Drive file id from `/file/d/<id>/...` or `?id=<id>` links.
/// Anything else is assumed to already be an id.
pub fn drive_file_id(url: &str) -> String {
    if url.contains("drive.google.com") {
        if let Some((_, rest)) = url.split_once("/file/d/") {
            return rest.split(['/', '?']).next().unwrap_or(rest).to_string();
        }
        if let Some((_, rest)) = url.split_once("id=") {
            return rest.split('&').next().unwrap_or(rest).to_string();
        }
    }
    url.to_string()
}

fn with_query_param(url: &str, key: &str, value: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().append_pair(key, value);
            parsed.to_string()
        }
        Err(_) => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{url}{sep}{key}={value}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accelerator_args_fixed_profile() {
        let args = accelerator_args("http://x/a.bin", Path::new("/models/vae"), Some("a.bin"));
        for flag in [
            "-c",
            "--file-allocation=none",
            "--max-connection-per-server=16",
            "--min-split-size=1M",
            "--max-tries=5",
            "--retry-wait=10",
            "--connect-timeout=30",
            "--timeout=600",
        ] {
            assert!(args.iter().any(|a| a == flag), "missing {flag}");
        }
        let tail = &args[args.len() - 5..];
        assert_eq!(tail, ["http://x/a.bin", "-d", "/models/vae", "-o", "a.bin"]);
    }

    #[test]
    fn test_accelerator_args_without_filename() {
        let args = accelerator_args("http://x/a", Path::new("/d"), None);
        assert!(!args.iter().any(|a| a == "-o"));
        assert_eq!(args.last().unwrap(), "/d");
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://huggingface.co/o/r/resolve/main/model.safetensors"),
            Some("model.safetensors".to_string())
        );
        assert_eq!(
            filename_from_url("https://host/files/a.ckpt?download=true#x"),
            Some("a.ckpt".to_string())
        );
        assert_eq!(filename_from_url("https://host/dir/"), None);
        assert_eq!(filename_from_url("not a url/b.pt?x=1"), Some("b.pt".to_string()));
    }

    #[test]
    fn test_drive_file_id_forms() {
        assert_eq!(
            drive_file_id("https://drive.google.com/file/d/ABC123/view?usp=sharing"),
            "ABC123"
        );
        assert_eq!(
            drive_file_id("https://drive.google.com/open?id=XYZ&authuser=0"),
            "XYZ"
        );
        assert_eq!(drive_file_id("RAWID"), "RAWID");
    }

    #[test]
    fn test_civitai_token_appended() {
        let provider = Provider::Civitai {
            token: Some(SecretString::from("secret".to_string())),
        };
        let (url, filename) = provider.resolve("https://civitai.com/api/download/models/42");
        assert_eq!(url, "https://civitai.com/api/download/models/42?token=secret");
        assert!(filename.is_none());

        let (url, _) = provider.resolve("https://civitai.com/api/download/models/42?type=Model");
        assert_eq!(
            url,
            "https://civitai.com/api/download/models/42?type=Model&token=secret"
        );
    }

    #[test]
    fn test_civitai_without_token() {
        let provider = Provider::Civitai { token: None };
        let (url, _) = provider.resolve("https://civitai.com/api/download/models/42");
        assert_eq!(url, "https://civitai.com/api/download/models/42");
    }

    #[test]
    fn test_google_drive_resolution() {
        let provider = Provider::GoogleDrive {
            filename: Some("  custom.safetensors ".into()),
        };
        let (url, filename) = provider.resolve("https://drive.google.com/file/d/ID9/view");
        assert_eq!(url, "https://drive.google.com/uc?export=download&id=ID9");
        assert_eq!(filename.as_deref(), Some("custom.safetensors"));

        let blank = Provider::GoogleDrive {
            filename: Some("   ".into()),
        };
        assert!(blank.resolve("ID9").1.is_none());
    }

    #[test]
    fn test_huggingface_uses_url_filename() {
        let (url, filename) =
            Provider::HuggingFace.resolve("https://huggingface.co/o/r/resolve/main/x.gguf");
        assert_eq!(url, "https://huggingface.co/o/r/resolve/main/x.gguf");
        assert_eq!(filename.as_deref(), Some("x.gguf"));
    }

    #[test]
    fn test_outcome_check() {
        assert!(Outcome::succeeded("http://x/a").check().is_ok());
        let err = Outcome::failed("http://x/a", "Download failed: 404").check().unwrap_err();
        assert!(matches!(err, crate::Error::FetchFailed(m) if m.contains("404")));
    }

    #[tokio::test]
    async fn test_missing_binary_becomes_failed_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = AcceleratorFetcher::new("/nonexistent/accelerator-binary");
        let outcome = fetcher
            .fetch("http://x/a.bin", dir.path(), &Provider::Direct)
            .await;
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Error during download"));
        assert_eq!(outcome.url, "http://x/a.bin");
        assert!(fetcher.in_flight.lock().unwrap().is_empty());
    }
}
