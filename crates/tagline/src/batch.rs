use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};

use crate::config::{BatchConfig, CaptionConfig};
use crate::error::{CaptionError, GenerationError};
use crate::generator::CaptionGenerator;
use crate::model::{DynModel, LoadOptions, ModelHandle, ModelLoader};
use crate::report::{BatchReport, BatchStatus, FileDetail, FileOutcome};

/// Hooks into a running batch.
///
/// All methods have no-op defaults; `()` is the observer that does nothing.
pub trait BatchObserver {
    /// Called once the eligible files are known and the model is loaded.
    fn on_start(&mut self, _total: usize) {}

    fn on_file_start(&mut self, _index: usize, _total: usize, _path: &Path) {}

    fn on_file_done(&mut self, _detail: &FileDetail) {}

    /// Polled before every file. Returning `true` ends the batch as cancelled.
    fn should_stop(&self) -> bool {
        false
    }
}

impl BatchObserver for () {}

impl BatchObserver for Arc<AtomicBool> {
    fn should_stop(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

/// Captions every eligible image of a folder, one at a time.
pub struct BatchProcessor<L: ModelLoader> {
    handle: ModelHandle<L>,
    generator: CaptionGenerator,
    config: BatchConfig,
}

impl<L: ModelLoader> BatchProcessor<L> {
    pub fn new(handle: ModelHandle<L>, generator: CaptionGenerator, config: BatchConfig) -> Self {
        Self {
            handle,
            generator,
            config,
        }
    }

    pub fn from_config(loader: L, config: &CaptionConfig) -> Self {
        Self::new(
            ModelHandle::new(loader, config.model.clone()),
            CaptionGenerator::from_config(config),
            config.batch.clone(),
        )
    }

    #[inline]
    pub fn handle(&self) -> &ModelHandle<L> {
        &self.handle
    }

    #[inline]
    pub fn handle_mut(&mut self) -> &mut ModelHandle<L> {
        &mut self.handle
    }

    #[inline]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Caption a folder without observing progress.
    pub fn process_folder(
        &mut self,
        folder: impl AsRef<Path>,
        options: LoadOptions,
    ) -> Result<BatchReport, CaptionError> {
        self.process_folder_with(folder, options, &mut ())
    }

    /// Caption every eligible image in `folder` that has no caption file yet.
    ///
    /// The model is loaded once, and only if there is at least one eligible file.
    /// Per-file failures are recorded in the report and never abort the run.
    ///
    /// # Errors
    ///
    /// * [`CaptionError::InvalidFolder`] if the path is empty or not a directory.
    /// * [`CaptionError::ReadFolder`] if the folder cannot be listed.
    /// * [`CaptionError::Model`] if the model cannot be made available.
    pub fn process_folder_with(
        &mut self,
        folder: impl AsRef<Path>,
        options: LoadOptions,
        observer: &mut dyn BatchObserver,
    ) -> Result<BatchReport, CaptionError> {
        let folder = validate_folder(folder.as_ref())?;
        let images = eligible_images(&folder, &self.config)?;
        let total = images.len();
        let mut report = BatchReport::new(&folder, total);

        if images.is_empty() {
            warn!("No supported images found in {}", folder.display());
            report.status = BatchStatus::NoEligibleFiles;
            return Ok(report);
        }

        info!("Found {total} images in {}", folder.display());

        let Self {
            handle,
            generator,
            config,
        } = self;
        let model = handle.ensure_loaded(options)?;

        let start = Instant::now();
        let mut attempts = 0;
        observer.on_start(total);

        for (index, path) in images.iter().enumerate() {
            if observer.should_stop() {
                warn!("Stop requested, {} files left unprocessed", total - index);
                report.cancel();
                break;
            }

            observer.on_file_start(index, total, path);
            info!("[{}/{total}] {}", index + 1, path.display());

            let detail = process_file(generator, config, &mut *model, path, &mut attempts);
            observer.on_file_done(&detail);
            report.record(detail);
        }

        model.release_cache();

        info!(
            "Batch finished in {:.1}s: {} captioned, {} failed, {} skipped, {} not started",
            start.elapsed().as_secs_f64(),
            report.success,
            report.failed,
            report.skipped,
            report.not_started
        );

        Ok(report)
    }
}

fn validate_folder(folder: &Path) -> Result<PathBuf, CaptionError> {
    // pasted paths often carry whitespace; non-UTF-8 paths are taken as they are
    let folder = match folder.to_str() {
        Some(raw) => PathBuf::from(raw.trim()),
        None => folder.to_path_buf(),
    };
    if folder.as_os_str().is_empty() {
        return Err(CaptionError::InvalidFolder(
            "the folder path is empty".to_string(),
        ));
    }

    if !folder.is_dir() {
        return Err(CaptionError::InvalidFolder(format!(
            "{} is not a directory",
            folder.display()
        )));
    }

    Ok(folder)
}

/// Regular files with a supported extension, excluding `._` resource forks.
fn eligible_images(folder: &Path, config: &BatchConfig) -> Result<Vec<PathBuf>, CaptionError> {
    let read_error = |source: std::io::Error| CaptionError::ReadFolder {
        path: folder.to_path_buf(),
        source,
    };

    let mut images = Vec::new();
    for entry in std::fs::read_dir(folder).map_err(read_error)? {
        let path = entry.map_err(read_error)?.path();
        if !path.is_file() {
            continue;
        }

        let hidden_fork = path
            .file_name()
            .is_some_and(|name| name.as_encoded_bytes().starts_with(b"._"));
        if hidden_fork {
            continue;
        }

        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| config.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if supported {
            images.push(path);
        }
    }

    if config.sort_entries {
        images.sort();
    }

    Ok(images)
}

fn process_file(
    generator: &CaptionGenerator,
    config: &BatchConfig,
    model: &mut DynModel,
    path: &Path,
    attempts: &mut usize,
) -> FileDetail {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let caption_path = path.with_extension(&config.output_extension);

    // a directory in the way is not a caption; writing over it fails below
    if caption_path.is_file() {
        info!("Caption exists, skipping {file_name}");
        return FileDetail::new(file_name, FileOutcome::Skipped);
    }

    *attempts += 1;
    let outcome = match generator.caption(&mut *model, &generator.request(path)) {
        Ok(caption) => {
            let chars = caption.chars().count();
            if chars <= config.min_caption_chars {
                warn!("Caption for {file_name} too short ({chars} chars), not saved");
                FileOutcome::TooShort { chars }
            } else {
                match write_caption(&caption_path, &caption) {
                    Ok(()) => FileOutcome::Captioned {
                        preview: preview(&caption, config.preview_chars),
                    },
                    Err(e) => {
                        warn!("Cannot write {}: {e}", caption_path.display());
                        FileOutcome::PersistFailed {
                            reason: e.to_string(),
                        }
                    }
                }
            }
        }
        Err(GenerationError::InvalidImage { reason, .. }) => FileOutcome::InvalidImage { reason },
        Err(e) => FileOutcome::GenerationFailed {
            reason: e.to_string(),
        },
    };

    if config.cleanup_interval > 0 && *attempts % config.cleanup_interval == 0 {
        model.release_cache();
    }

    FileDetail::new(file_name, outcome)
}

// create_new: an existing caption is never overwritten
fn write_caption(path: &Path, caption: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(caption.as_bytes())
}

fn preview(caption: &str, max_chars: usize) -> String {
    if caption.chars().count() <= max_chars {
        return caption.to_string();
    }
    let head = caption.chars().take(max_chars).collect::<String>();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_is_cut_by_chars() {
        assert_eq!(preview("短标题", 70), "短标题");
        assert_eq!(preview("一二三四五", 3), "一二三...");
    }

    #[test]
    fn empty_folder_path_is_invalid() {
        assert!(matches!(
            validate_folder(Path::new("   ")),
            Err(CaptionError::InvalidFolder(_))
        ));
        assert!(matches!(
            validate_folder(Path::new("/definitely/not/here")),
            Err(CaptionError::InvalidFolder(_))
        ));
    }

    #[test]
    fn folder_path_is_trimmed() -> std::io::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let padded = format!("  {}  ", tmp_dir.path().display());
        let folder = validate_folder(Path::new(&padded)).map_err(std::io::Error::other)?;
        assert_eq!(folder, tmp_dir.path());
        Ok(())
    }

    #[test]
    fn eligible_images_filters_and_sorts() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        for name in [
            "b.JPG",
            "a.png",
            "._a.png",
            "notes.txt",
            "c.webp",
            "d.gif",
            "noext",
        ] {
            std::fs::write(tmp_dir.path().join(name), b"x")?;
        }
        std::fs::create_dir(tmp_dir.path().join("nested.jpg"))?;

        let images = eligible_images(tmp_dir.path(), &BatchConfig::default())?;
        let names = images
            .iter()
            .filter_map(|p| p.file_name()?.to_str())
            .collect::<Vec<_>>();

        assert_eq!(names, vec!["a.png", "b.JPG", "c.webp"]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_are_kept() -> Result<(), Box<dyn std::error::Error>> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp_dir = tempfile::tempdir()?;
        let folder = tmp_dir.path().join(OsStr::from_bytes(b"fotos-\xe9t\xe9"));
        std::fs::create_dir(&folder)?;
        std::fs::write(folder.join(OsStr::from_bytes(b"caf\xe9.png")), b"x")?;
        std::fs::write(folder.join(OsStr::from_bytes(b"._caf\xe9.png")), b"x")?;

        let folder = validate_folder(&folder)?;
        let images = eligible_images(&folder, &BatchConfig::default())?;

        assert_eq!(images.len(), 1);
        assert_eq!(
            images[0].file_name().map(|n| n.as_encoded_bytes()),
            Some(&b"caf\xe9.png"[..])
        );
        Ok(())
    }
}
