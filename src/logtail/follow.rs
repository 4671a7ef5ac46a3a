//! Seeding and following the backing log file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::buffer::LogBuffer;
use super::render::format_line;
use crate::{Error, Result};

/// Called with the rendered markup of every line the follow loop accepts.
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Tails one log file into a shared [`LogBuffer`].
#[derive(Clone)]
pub struct LogTailer {
    path: PathBuf,
    buffer: Arc<LogBuffer>,
    subscriber: Option<LineCallback>,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl LogTailer {
    pub fn new(path: impl Into<PathBuf>, buffer: Arc<LogBuffer>) -> Self {
        Self {
            path: path.into(),
            buffer,
            subscriber: None,
            poll_interval: POLL_INTERVAL,
            error_backoff: ERROR_BACKOFF,
        }
    }

    pub fn with_subscriber(mut self, callback: LineCallback) -> Self {
        self.subscriber = Some(callback);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buffer(&self) -> &Arc<LogBuffer> {
        &self.buffer
    }

    /// Load the tail of the file into the buffer, replacing its contents.
    ///
    /// Returns the number of bytes read, which is where following resumes.
    pub async fn seed(&self) -> Result<u64> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::LogSource(format!("failed reading {}: {e}", self.path.display())))?;
        let text = String::from_utf8_lossy(&bytes);

        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(self.buffer.capacity());
        let kept = lines[start..]
            .iter()
            .map(|l| l.trim_end())
            .filter(|l| !l.is_empty())
            .map(ToString::to_string);
        self.buffer.replace(kept);

        debug!("Seeded {} log lines from {}", self.buffer.len(), self.path.display());
        Ok(bytes.len() as u64)
    }

    /// Drop everything in the buffer and seed again from the file.
    pub async fn reseed(&self) -> Result<u64> {
        self.buffer.clear();
        self.seed().await
    }

    /// Read complete lines appended past `offset` and feed them to the buffer.
    ///
    /// A file shorter than `offset` was truncated or rotated; reading restarts
    /// from the beginning. Returns the number of new bytes consumed.
    pub async fn poll_once(&self, offset: &mut u64) -> Result<usize> {
        let len = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| Error::LogSource(format!("stat {}: {e}", self.path.display())))?
            .len();

        if len < *offset {
            debug!("{} shrank below offset {}, rewinding", self.path.display(), offset);
            *offset = 0;
        }
        if len == *offset {
            return Ok(0);
        }

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| Error::LogSource(format!("open {}: {e}", self.path.display())))?;
        file.seek(SeekFrom::Start(*offset))
            .await
            .map_err(|e| Error::LogSource(format!("seek {}: {e}", self.path.display())))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .await
            .map_err(|e| Error::LogSource(format!("read {}: {e}", self.path.display())))?;

        // A trailing line without its newline is still being written.
        let Some(complete) = bytes.iter().rposition(|b| *b == b'\n').map(|i| i + 1) else {
            return Ok(0);
        };
        *offset += complete as u64;
        for raw in String::from_utf8_lossy(&bytes[..complete]).lines() {
            self.ingest(raw);
        }
        Ok(complete)
    }

    fn ingest(&self, raw: &str) {
        let line = raw.trim_end();
        if line.trim().is_empty() {
            return;
        }
        if self.buffer.append(line) {
            if let Some(callback) = &self.subscriber {
                callback(&format_line(line));
            }
        }
    }

    /// Seed the buffer and spawn the follow loop.
    ///
    /// The loop stops when [`TailHandle::stop`] is called or the handle is
    /// dropped. Calling `start` again afterwards re-seeds and follows anew.
    pub async fn start(&self) -> Result<TailHandle> {
        ensure_file(&self.path).await?;

        let offset = match self.seed().await {
            Ok(offset) => offset,
            Err(e) => {
                warn!("Error seeding log buffer: {}", e);
                0
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tailer = self.clone();
        let task = tokio::spawn(async move { tailer.follow(offset, shutdown_rx).await });
        info!("Following {}", self.path.display());

        Ok(TailHandle {
            shutdown: shutdown_tx,
            task,
        })
    }

    async fn follow(self, mut offset: u64, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.poll_once(&mut offset).await {
                Ok(0) => self.poll_interval,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Error following log file: {}", e);
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!("Stopped following {}", self.path.display());
    }
}

/// Handle to a running follow loop.
pub struct TailHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TailHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn ensure_file(path: &Path) -> Result<()> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn tailer_for(path: &Path, capacity: usize) -> LogTailer {
        LogTailer::new(path, Arc::new(LogBuffer::new(capacity)))
    }

    #[tokio::test]
    async fn test_seed_keeps_tail_and_collapses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "one\n\ntwo  \ntwo\n   \nthree\n").unwrap();

        let tailer = tailer_for(&path, 500);
        let offset = tailer.seed().await.unwrap();
        assert_eq!(offset, std::fs::metadata(&path).unwrap().len());
        assert_eq!(tailer.buffer().snapshot(), ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_seed_reads_only_last_capacity_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let text: String = (0..20).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, text).unwrap();

        let tailer = tailer_for(&path, 5);
        tailer.seed().await.unwrap();
        assert_eq!(
            tailer.buffer().snapshot(),
            ["line 15", "line 16", "line 17", "line 18", "line 19"]
        );
    }

    #[tokio::test]
    async fn test_seed_blank_between_duplicates_collapses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "a\n\na\nb\n").unwrap();

        let tailer = tailer_for(&path, 500);
        tailer.seed().await.unwrap();
        assert_eq!(tailer.buffer().snapshot(), ["a", "b"]);
    }

    #[tokio::test]
    async fn test_poll_once_notifies_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tailer = tailer_for(&path, 500).with_subscriber(Arc::new(move |html: &str| {
            sink.lock().unwrap().push(html.to_string());
        }));

        std::fs::write(&path, "[2024-01-01 10:00:00] ERROR boom\nsame\nsame\n\n").unwrap();
        let mut offset = 0;
        let read = tailer.poll_once(&mut offset).await.unwrap();
        assert_eq!(read as u64, offset);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("log-error"));
        assert_eq!(tailer.buffer().snapshot(), ["[2024-01-01 10:00:00] ERROR boom", "same"]);
    }

    #[tokio::test]
    async fn test_poll_once_waits_for_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "done\nhalf").unwrap();

        let tailer = tailer_for(&path, 10);
        let mut offset = 0;
        assert_eq!(tailer.poll_once(&mut offset).await.unwrap(), 5);
        assert_eq!(tailer.poll_once(&mut offset).await.unwrap(), 0);
        assert_eq!(offset, 5);

        std::fs::write(&path, "done\nhalf line\n").unwrap();
        tailer.poll_once(&mut offset).await.unwrap();
        assert_eq!(tailer.buffer().snapshot(), ["done", "half line"]);
    }

    #[tokio::test]
    async fn test_poll_once_missing_file_is_log_source_error() {
        let tailer = tailer_for(Path::new("/nonexistent/dir/app.log"), 10);
        let mut offset = 0;
        let err = tailer.poll_once(&mut offset).await.unwrap_err();
        assert!(matches!(err, Error::LogSource(_)));
    }

    #[tokio::test]
    async fn test_start_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/app.log");

        let tailer = tailer_for(&path, 10);
        let handle = tailer.start().await.unwrap();
        assert!(path.exists());
        handle.stop().await;
    }
}
