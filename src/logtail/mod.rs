//! Log Tail Pipeline
//!
//! Keeps the most recent lines of the host app's log in memory:
//! - Seed: load the last lines of the file on (re)start
//! - Follow: poll for appended bytes, recovering from truncation
//! - Render: HTML markup with timestamp and severity class
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use comfy_provision::logtail::{LogBuffer, LogTailer};
//!
//! # async fn demo() -> comfy_provision::Result<()> {
//! let buffer = Arc::new(LogBuffer::default());
//! let tailer = LogTailer::new("/workspace/logs/comfyui.log", buffer.clone());
//! let handle = tailer.start().await?;
//!
//! println!("{}", comfy_provision::logtail::render_snapshot(&buffer.snapshot()));
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod follow;
pub mod render;

pub use buffer::{LogBuffer, DEFAULT_CAPACITY};
pub use follow::{LineCallback, LogTailer, TailHandle};
pub use render::{format_line, render_snapshot, Severity};
