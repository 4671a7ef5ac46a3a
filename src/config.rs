//! Environment-driven settings.
//!
//! Every path the toolkit touches hangs off a workspace root (`/workspace` on
//! a provisioned pod). Each value can be overridden through an environment
//! variable so tests and local runs can point the toolkit at a scratch tree.

use std::path::PathBuf;

/// Standard model categories written into a fresh manifest.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "checkpoints",
    "vae",
    "unet",
    "diffusion_models",
    "text_encoders",
    "loras",
    "upscale_models",
    "clip",
    "controlnet",
    "clip_vision",
    "ipadapter",
    "style_models",
];

const DEFAULT_WORKSPACE: &str = "/workspace";
const DEFAULT_ACCELERATOR: &str = "aria2c";

#[derive(Debug, Clone)]
pub struct Settings {
    pub workspace_dir: PathBuf,
    /// Host app install directory (`<workspace>/ComfyUI`).
    pub app_dir: PathBuf,
    /// Manifest location, either a filesystem path or an http(s) URL.
    pub manifest_location: String,
    /// Where an empty default manifest is written when none exists.
    pub default_manifest_path: PathBuf,
    pub skip_download: bool,
    pub force_download: bool,
    pub log_file: PathBuf,
    pub accelerator_bin: String,
    pub start_script: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Self {
        let workspace_dir = std::env::var("COMFY_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_WORKSPACE));
        let mut settings = Self::for_workspace(workspace_dir);

        if let Ok(dir) = std::env::var("COMFY_APP_DIR") {
            settings.app_dir = PathBuf::from(dir);
        }
        if let Ok(location) = std::env::var("MODELS_CONFIG_URL") {
            settings.manifest_location = location;
        }
        if let Ok(path) = std::env::var("COMFY_LOG_FILE") {
            settings.log_file = PathBuf::from(path);
        }
        if let Ok(bin) = std::env::var("ARIA2C_BIN") {
            settings.accelerator_bin = bin;
        }
        settings.start_script = std::env::var_os("COMFY_START_SCRIPT").map(PathBuf::from);
        settings.skip_download = env_flag("SKIP_MODEL_DOWNLOAD");
        settings.force_download = env_flag("FORCE_MODEL_DOWNLOAD");
        settings
    }

    /// Defaults rooted at `workspace_dir`, ignoring the environment.
    pub fn for_workspace(workspace_dir: impl Into<PathBuf>) -> Self {
        let workspace_dir = workspace_dir.into();
        let default_manifest_path = workspace_dir.join("models_config.json");
        Self {
            app_dir: workspace_dir.join("ComfyUI"),
            manifest_location: default_manifest_path.display().to_string(),
            default_manifest_path,
            skip_download: false,
            force_download: false,
            log_file: workspace_dir.join("logs").join("comfyui.log"),
            accelerator_bin: DEFAULT_ACCELERATOR.to_string(),
            start_script: None,
            workspace_dir,
        }
    }

    pub fn models_dir(&self) -> PathBuf {
        self.app_dir.join("models")
    }

    pub fn custom_nodes_dir(&self) -> PathBuf {
        self.app_dir.join("custom_nodes")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.app_dir.join("output")
    }

    /// Resolve a category argument (`loras` or `models/loras`) to its directory.
    pub fn category_dir(&self, category: &str) -> PathBuf {
        match category.strip_prefix("models/") {
            Some(rest) => self.models_dir().join(rest),
            None => self.models_dir().join(category),
        }
    }

    /// Places the provisioning script may live, first match wins.
    pub fn start_script_candidates(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        if let Some(script) = &self.start_script {
            out.push(script.clone());
        }
        out.push(PathBuf::from("/start.sh"));
        out.push(PathBuf::from("./start.sh"));
        out.push(self.workspace_dir.join("start.sh"));
        out
    }

    /// Places the manifest may live for read-only inspection, first match wins.
    pub fn manifest_candidates(&self) -> Vec<PathBuf> {
        let mut out = vec![self.default_manifest_path.clone()];
        if !self.manifest_location.starts_with("http://")
            && !self.manifest_location.starts_with("https://")
        {
            let configured = PathBuf::from(&self.manifest_location);
            if configured != self.default_manifest_path {
                out.insert(0, configured);
            }
        }
        out.push(PathBuf::from("./models_config.json"));
        out
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
