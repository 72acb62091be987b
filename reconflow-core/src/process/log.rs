//! Bounded per-scan log, optionally mirrored to a file for later viewing.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Append-only text sink consumed by the process runner and the pipeline.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Records one line. Never fails; sinks handle their own errors.
    async fn append(&self, line: &str);
}

/// Keeps the newest lines within both a line and a byte budget.
#[derive(Debug, Clone)]
pub struct LineRing {
    lines: VecDeque<String>,
    bytes: usize,
    max_lines: usize,
    max_bytes: usize,
    dropped: u64,
}

impl LineRing {
    /// Both budgets are clamped to at least one.
    pub fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            max_lines: max_lines.max(1),
            max_bytes: max_bytes.max(1),
            dropped: 0,
        }
    }

    /// Adds `line`, evicting the oldest lines over budget.
    pub fn push(&mut self, line: &str) {
        let line = truncate_to_boundary(line, self.max_bytes);
        self.bytes += line.len();
        self.lines.push_back(line.to_string());
        while self.lines.len() > self.max_lines || self.bytes > self.max_bytes {
            match self.lines.pop_front() {
                Some(old) => {
                    self.bytes -= old.len();
                    self.dropped += 1;
                }
                None => break,
            }
        }
    }

    /// Number of retained lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True when nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines evicted so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Newest `count` lines, oldest first.
    pub fn tail(&self, count: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(count);
        self.lines.iter().skip(skip).cloned().collect()
    }

    /// Retained lines joined with newlines.
    pub fn joined(&self) -> String {
        let mut out = String::with_capacity(self.bytes + self.lines.len());
        for (idx, line) in self.lines.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            out.push_str(line);
        }
        out
    }
}

fn truncate_to_boundary(line: &str, max: usize) -> &str {
    if line.len() <= max {
        return line;
    }
    let mut end = max;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

/// Rolling log of one scan. Readers see the in-memory ring; the file copy is
/// complete up to [`ScanLog::close`].
pub struct ScanLog {
    ring: Mutex<LineRing>,
    file: Mutex<Option<tokio::fs::File>>,
    path: Option<PathBuf>,
    file_failed: AtomicBool,
}

impl fmt::Debug for ScanLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines = self.ring.try_lock().map(|ring| ring.len()).ok();
        f.debug_struct("ScanLog")
            .field("path", &self.path)
            .field("lines", &lines)
            .finish()
    }
}

impl ScanLog {
    /// A log with no file mirror.
    pub fn in_memory(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            ring: Mutex::new(LineRing::new(max_lines, max_bytes)),
            file: Mutex::new(None),
            path: None,
            file_failed: AtomicBool::new(false),
        }
    }

    /// Creates (or truncates) `path` and mirrors every line to it.
    pub async fn with_file(
        path: &Path,
        max_lines: usize,
        max_bytes: usize,
    ) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(path).await?;
        Ok(Self {
            ring: Mutex::new(LineRing::new(max_lines, max_bytes)),
            file: Mutex::new(Some(file)),
            path: Some(path.to_path_buf()),
            file_failed: AtomicBool::new(false),
        })
    }

    /// File mirror location, if one was opened.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Newest `count` lines, oldest first.
    pub async fn tail(&self, count: usize) -> Vec<String> {
        self.ring.lock().await.tail(count)
    }

    /// Every retained line.
    pub async fn lines(&self) -> Vec<String> {
        let ring = self.ring.lock().await;
        ring.tail(ring.len())
    }

    /// Flushes and releases the file mirror. Later lines stay in memory only.
    pub async fn close(&self) {
        let Some(file) = self.file.lock().await.take() else {
            return;
        };
        if let Err(err) = file.sync_all().await {
            warn!(target: "scan::log", path = ?self.path, error = %err, "scan log sync failed");
        }
    }

    /// Whether lines are still mirrored to disk.
    pub async fn is_file_open(&self) -> bool {
        self.file.lock().await.is_some()
    }
}

#[async_trait]
impl LogSink for ScanLog {
    async fn append(&self, line: &str) {
        self.ring.lock().await.push(line);

        if self.file_failed.load(Ordering::Relaxed) {
            return;
        }
        let mut guard = self.file.lock().await;
        let Some(file) = guard.as_mut() else {
            return;
        };
        let write = async {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await
        };
        if let Err(err) = write.await {
            // Keep the in-memory log going; one warning is enough.
            self.file_failed.store(true, Ordering::Relaxed);
            warn!(
                target: "scan::log",
                path = ?self.path,
                error = %err,
                "scan log file write failed"
            );
        }
    }
}
