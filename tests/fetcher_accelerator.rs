//! AcceleratorFetcher driving fake accelerator scripts.
//!
//! The scripts understand just enough of the aria2c command line (`-d`, `-o`,
//! positional URL) to create the requested file and record their invocation.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use comfy_provision::fetcher::{AcceleratorFetcher, Fetcher, Provider};
use secrecy::SecretString;
use tempfile::TempDir;

const OK_SCRIPT: &str = r#"#!/bin/sh
dir="."; out=""; url=""
while [ $# -gt 0 ]; do
    case "$1" in
        -d) dir="$2"; shift 2 ;;
        -o) out="$2"; shift 2 ;;
        -x|-s|-k) shift 2 ;;
        -*) shift ;;
        *) url="$1"; shift ;;
    esac
done
echo "$url" >> "$dir/.calls"
if [ -z "$out" ]; then
    out=$(basename "${url%%\?*}")
fi
echo "start $out" >> "$dir/.events"
sleep "${FAKE_DELAY:-0}"
printf 'data' > "$dir/$out"
echo "end $out" >> "$dir/.events"
"#;

const STDERR_SCRIPT: &str = "#!/bin/sh\necho 'errorCode=3 Resource not found' >&2\nexit 3\n";

const STDOUT_SCRIPT: &str = "#!/bin/sh\necho 'only on stdout'\nexit 1\n";

const SLOW_SCRIPT: &str = "#!/bin/sh\nFAKE_DELAY=0.2 exec \"$(dirname \"$0\")/ok.sh\" \"$@\"\n";

/// Scripts are written once, before any test spawns a process, so no child
/// can inherit a still-open write handle to them.
fn scripts() -> &'static Path {
    static DIR: OnceLock<TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in [
            ("ok.sh", OK_SCRIPT),
            ("stderr.sh", STDERR_SCRIPT),
            ("stdout.sh", STDOUT_SCRIPT),
            ("slow.sh", SLOW_SCRIPT),
        ] {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        dir
    })
    .path()
}

fn fetcher(script: &str) -> AcceleratorFetcher {
    AcceleratorFetcher::new(scripts().join(script).display().to_string())
}

fn read_lines(path: PathBuf) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(ToString::to_string)
        .collect()
}

#[tokio::test]
async fn test_huggingface_download_creates_file() {
    let ws = tempfile::tempdir().unwrap();
    let dest = ws.path().join("models/checkpoints");

    let outcome = fetcher("ok.sh")
        .fetch(
            "https://huggingface.co/o/r/resolve/main/model.gguf",
            &dest,
            &Provider::HuggingFace,
        )
        .await;

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "Download completed successfully");
    assert_eq!(std::fs::read(dest.join("model.gguf")).unwrap(), b"data");
}

#[tokio::test]
async fn test_drive_link_uses_direct_download_and_filename() {
    let ws = tempfile::tempdir().unwrap();
    let provider = Provider::GoogleDrive {
        filename: Some("upscaler.pth".into()),
    };

    let outcome = fetcher("ok.sh")
        .fetch(
            "https://drive.google.com/file/d/FILEID/view?usp=sharing",
            ws.path(),
            &provider,
        )
        .await;

    assert!(outcome.success);
    assert!(ws.path().join("upscaler.pth").is_file());
    assert_eq!(
        read_lines(ws.path().join(".calls")),
        ["https://drive.google.com/uc?export=download&id=FILEID"]
    );
}

#[tokio::test]
async fn test_civitai_token_reaches_accelerator_only() {
    let ws = tempfile::tempdir().unwrap();
    let provider = Provider::Civitai {
        token: Some(SecretString::from("tok123".to_string())),
    };
    let url = "https://civitai.com/api/download/models/4242";

    let outcome = fetcher("ok.sh").fetch(url, ws.path(), &provider).await;

    assert!(outcome.success);
    assert_eq!(outcome.url, url);
    assert_eq!(read_lines(ws.path().join(".calls")), [format!("{url}?token=tok123")]);
}

#[tokio::test]
async fn test_nonzero_exit_reports_stderr() {
    let ws = tempfile::tempdir().unwrap();
    let outcome = fetcher("stderr.sh")
        .fetch("https://x/a.bin", ws.path(), &Provider::Direct)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.message, "Download failed: errorCode=3 Resource not found");
    assert!(outcome.check().is_err());
}

#[tokio::test]
async fn test_nonzero_exit_falls_back_to_stdout() {
    let ws = tempfile::tempdir().unwrap();
    let outcome = fetcher("stdout.sh")
        .fetch("https://x/a.bin", ws.path(), &Provider::Direct)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.message, "Download failed: only on stdout");
}

#[tokio::test]
async fn test_same_destination_downloads_are_serialized() {
    let ws = tempfile::tempdir().unwrap();
    let fetcher = fetcher("slow.sh");
    let url = "https://x/shared.safetensors";

    let (a, b) = tokio::join!(
        fetcher.fetch(url, ws.path(), &Provider::Direct),
        fetcher.fetch(url, ws.path(), &Provider::Direct),
    );

    assert!(a.success && b.success);
    assert_eq!(
        read_lines(ws.path().join(".events")),
        [
            "start shared.safetensors",
            "end shared.safetensors",
            "start shared.safetensors",
            "end shared.safetensors"
        ]
    );
}
