//! Output sinks: the review dataset and HTML diagnostics.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{HarvestError, Result};
use crate::models::Review;

/// Destination for accepted reviews.
pub trait ReviewSink: Send {
    fn emit(&mut self, review: &Review) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    /// Create (or truncate) the output file, making parent directories.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)
            .map_err(|e| HarvestError::Sink(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl ReviewSink for JsonlSink {
    fn emit(&mut self, review: &Review) -> Result<()> {
        serde_json::to_writer(&mut self.writer, review)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps reviews in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub reviews: Vec<Review>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReviewSink for MemorySink {
    fn emit(&mut self, review: &Review) -> Result<()> {
        self.reviews.push(review.clone());
        Ok(())
    }
}

/// Saves page HTML under a label, at most once per label per run.
#[derive(Debug)]
pub struct DiagnosticStore {
    dir: Option<PathBuf>,
    written: HashSet<String>,
}

impl DiagnosticStore {
    /// Store under `dir`; `None` records labels but writes nothing.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            written: HashSet::new(),
        }
    }

    /// True if `label` has already been saved this run.
    pub fn contains(&self, label: &str) -> bool {
        self.written.contains(label)
    }

    /// Persist `html` as `<dir>/<label>.html` unless already saved.
    ///
    /// Returns whether this call claimed the label. Write failures are
    /// logged, never propagated.
    pub fn save(&mut self, label: &str, html: &str) -> bool {
        if !self.written.insert(label.to_string()) {
            return false;
        }

        let Some(dir) = &self.dir else {
            return true;
        };

        let path = dir.join(format!("{}.html", sanitize_label(label)));
        let result = fs::create_dir_all(dir).and_then(|_| fs::write(&path, html));
        match result {
            Ok(()) => info!("Saved debug HTML to {}", path.display()),
            Err(e) => warn!("Failed to save debug HTML {}: {}", path.display(), e),
        }
        true
    }
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
