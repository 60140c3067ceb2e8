use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// What happened to one file of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileOutcome {
    /// A caption was written next to the image.
    Captioned { preview: String },
    /// A caption file already existed.
    Skipped,
    /// The file could not be opened or decoded as an image.
    InvalidImage { reason: String },
    /// The model failed on the image.
    GenerationFailed { reason: String },
    /// The normalized caption was too short to be kept.
    TooShort { chars: usize },
    /// The caption could not be written.
    PersistFailed { reason: String },
}

impl FileOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidImage { .. }
                | Self::GenerationFailed { .. }
                | Self::TooShort { .. }
                | Self::PersistFailed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDetail {
    pub file_name: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

impl FileDetail {
    pub fn new(file_name: impl Into<String>, outcome: FileOutcome) -> Self {
        Self {
            file_name: file_name.into(),
            outcome,
        }
    }
}

impl fmt::Display for FileDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = &self.file_name;
        match &self.outcome {
            FileOutcome::Captioned { preview } => write!(f, "✅ captioned: {name}\n   {preview}"),
            FileOutcome::Skipped => write!(f, "⏭️ skipped (caption exists): {name}"),
            FileOutcome::InvalidImage { reason } => {
                write!(f, "❌ failed: {name} (invalid image: {reason})")
            }
            FileOutcome::GenerationFailed { reason } => write!(f, "❌ failed: {name} ({reason})"),
            FileOutcome::TooShort { chars } => {
                write!(f, "❌ failed: {name} (caption too short, {chars} chars)")
            }
            FileOutcome::PersistFailed { reason } => {
                write!(f, "❌ failed: {name} (cannot write caption: {reason})")
            }
        }
    }
}

/// How a batch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    /// The folder held no supported images; the model was not touched.
    NoEligibleFiles,
    /// A stop was requested before every file was visited.
    Cancelled,
}

/// Counters and per-file details of one batch run.
///
/// `success + failed + skipped + not_started == total` holds for every report
/// produced by [`BatchProcessor`](crate::batch::BatchProcessor).
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub folder: PathBuf,
    pub status: BatchStatus,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    /// files never visited because the run was cancelled
    pub not_started: usize,
    pub details: Vec<FileDetail>,
}

impl BatchReport {
    pub fn new(folder: impl Into<PathBuf>, total: usize) -> Self {
        Self {
            folder: folder.into(),
            status: BatchStatus::Completed,
            total,
            success: 0,
            failed: 0,
            skipped: 0,
            not_started: 0,
            details: Vec::with_capacity(total),
        }
    }

    pub(crate) fn record(&mut self, detail: FileDetail) {
        match &detail.outcome {
            FileOutcome::Captioned { .. } => self.success += 1,
            FileOutcome::Skipped => self.skipped += 1,
            _ => self.failed += 1,
        }
        self.details.push(detail);
    }

    pub(crate) fn cancel(&mut self) {
        let visited = self.success + self.failed + self.skipped;
        self.not_started = self.total.saturating_sub(visited);
        self.status = BatchStatus::Cancelled;
    }

    /// Share of attempted files that were captioned, in percent.
    ///
    /// Skipped and never-started files are not attempts. An empty batch rates 0.
    pub fn success_rate(&self) -> f64 {
        let attempted = self
            .total
            .saturating_sub(self.skipped + self.not_started)
            .max(1);
        self.success as f64 / attempted as f64 * 100.0
    }

    pub fn is_consistent(&self) -> bool {
        self.success + self.failed + self.skipped + self.not_started == self.total
    }

    /// The last `window` details, oldest first.
    pub fn recent_details(&self, window: usize) -> &[FileDetail] {
        let start = self.details.len().saturating_sub(window);
        &self.details[start..]
    }

    /// Human readable summary with the last `window` file details.
    pub fn summary(&self, window: usize) -> String {
        let mut out = match self.status {
            BatchStatus::NoEligibleFiles => {
                return format!("❌ No supported images found in {}", self.folder.display());
            }
            BatchStatus::Completed => "🎉 Batch finished".to_string(),
            BatchStatus::Cancelled => "⏹️ Batch stopped".to_string(),
        };

        out.push_str(&format!(
            "\n\n📊 Total: {} | ✅ Success: {} | ❌ Failed: {} | ⏭️ Skipped: {}",
            self.total, self.success, self.failed, self.skipped
        ));
        if self.not_started > 0 {
            out.push_str(&format!(" | ⏸️ Not started: {}", self.not_started));
        }
        out.push_str(&format!("\n📈 Success rate: {:.1}%", self.success_rate()));
        out.push_str(&format!("\n📁 Output folder: {}", self.folder.display()));

        let recent = self.recent_details(window);
        if !recent.is_empty() {
            out.push_str(&format!("\n\n🔍 Last {} files:", recent.len()));
            for detail in recent {
                out.push_str(&format!("\n{detail}"));
            }
        }

        out
    }
}
