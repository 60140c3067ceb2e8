use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sysinfo::{Disks, System};

use crate::config::ResourceConfig;
use crate::model::{DeviceKind, LoadOptions, ModelStatus};

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Snapshot of host resources and model state, shown before a run.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub os: Option<String>,
    pub cpu_count: usize,
    pub total_memory_gb: f64,
    pub available_memory_gb: f64,
    /// mount point of the disk holding the model directory
    pub disk_mount: Option<PathBuf>,
    pub disk_free_gb: Option<f64>,
    /// placement and precision the next batch will ask for
    pub requested: LoadOptions,
    /// accelerator the backend can reach, `None` when only the CPU is usable
    pub accelerator: Option<String>,
    pub model: ModelStatus,
    pub warnings: Vec<String>,
}

impl SystemStatus {
    /// Probe the host. Never fails; values that cannot be read are left out.
    ///
    /// `requested` is replaced by the options of the resident model, if any.
    pub fn probe(
        model: ModelStatus,
        requested: LoadOptions,
        accelerator: Option<&str>,
        thresholds: &ResourceConfig,
    ) -> Self {
        let requested = model.requested.unwrap_or(requested);

        let mut sys = System::new();
        sys.refresh_memory();

        let total_memory_gb = sys.total_memory() as f64 / GB;
        let available_memory_gb = sys.available_memory() as f64 / GB;

        let disks = Disks::new_with_refreshed_list();
        let mounts = disks
            .list()
            .iter()
            .map(|disk| (disk.mount_point().to_path_buf(), disk.available_space()))
            .collect::<Vec<_>>();
        let disk = disk_for_path(&mounts, &existing_ancestor(&model.model_dir));

        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let disk_free_gb = disk.map(|(_, free)| *free as f64 / GB);
        let mut warnings = resource_warnings(disk_free_gb, available_memory_gb, thresholds);
        warnings.extend(device_warning(requested, accelerator));
        for warning in &warnings {
            log::warn!("{warning}");
        }

        Self {
            os: System::long_os_version(),
            cpu_count,
            total_memory_gb,
            available_memory_gb,
            disk_mount: disk.map(|(mount, _)| mount.clone()),
            disk_free_gb,
            requested,
            accelerator: accelerator.map(str::to_string),
            model,
            warnings,
        }
    }
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "🖥️ System status")?;
        if let Some(os) = &self.os {
            writeln!(f, "   OS: {os}")?;
        }
        writeln!(f, "   CPUs: {}", self.cpu_count)?;
        writeln!(
            f,
            "   Memory: {:.1} GB available of {:.1} GB",
            self.available_memory_gb, self.total_memory_gb
        )?;
        if let (Some(mount), Some(free)) = (&self.disk_mount, self.disk_free_gb) {
            writeln!(f, "   Disk: {free:.1} GB free on {}", mount.display())?;
        }

        writeln!(f, "   Requested: {}", self.requested)?;
        match &self.accelerator {
            Some(accelerator) => writeln!(f, "   Accelerator: {accelerator}")?,
            None => writeln!(f, "   Accelerator: none, CPU only")?,
        }

        writeln!(f, "   Model dir: {}", self.model.model_dir.display())?;
        match (&self.model.description, self.model.effective) {
            (Some(description), Some(effective)) => {
                writeln!(f, "   Model: loaded, {description} ({effective})")?
            }
            _ => writeln!(f, "   Model: not loaded")?,
        }

        for warning in &self.warnings {
            writeln!(f, "⚠️ {warning}")?;
        }
        Ok(())
    }
}

fn resource_warnings(
    disk_free_gb: Option<f64>,
    available_memory_gb: f64,
    thresholds: &ResourceConfig,
) -> Vec<String> {
    let mut warnings = Vec::new();
    if let Some(free) = disk_free_gb {
        if free < thresholds.min_disk_free_gb {
            warnings.push(format!(
                "Low disk space: {free:.1} GB free, at least {:.0} GB recommended",
                thresholds.min_disk_free_gb
            ));
        }
    }
    if available_memory_gb < thresholds.min_memory_available_gb {
        warnings.push(format!(
            "Low memory: {available_memory_gb:.1} GB available, at least {:.0} GB recommended",
            thresholds.min_memory_available_gb
        ));
    }
    warnings
}

fn device_warning(requested: LoadOptions, accelerator: Option<&str>) -> Option<String> {
    match (requested.device, accelerator) {
        (DeviceKind::Gpu, None) => Some(
            "GPU requested but no accelerator is available, inference will run on the CPU"
                .to_string(),
        ),
        _ => None,
    }
}

// the model dir may not exist yet; measure the disk it would land on
fn existing_ancestor(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    absolute
        .ancestors()
        .find(|p| p.exists())
        .and_then(|p| p.canonicalize().ok())
        .unwrap_or(absolute)
}

/// The mount with the longest mount point containing `path`.
fn disk_for_path<'a>(mounts: &'a [(PathBuf, u64)], path: &Path) -> Option<&'a (PathBuf, u64)> {
    mounts
        .iter()
        .filter(|(mount, _)| path.starts_with(mount))
        .max_by_key(|(mount, _)| mount.components().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_deepest_mount() {
        let mounts = vec![
            (PathBuf::from("/"), 10),
            (PathBuf::from("/data"), 20),
            (PathBuf::from("/data/models"), 30),
            (PathBuf::from("/home"), 40),
        ];

        let disk = disk_for_path(&mounts, Path::new("/data/models/paligemma"));
        assert_eq!(disk.map(|(_, free)| *free), Some(30));

        let disk = disk_for_path(&mounts, Path::new("/data/other"));
        assert_eq!(disk.map(|(_, free)| *free), Some(20));

        let disk = disk_for_path(&mounts, Path::new("/tmp"));
        assert_eq!(disk.map(|(_, free)| *free), Some(10));

        assert!(disk_for_path(&mounts[1..], Path::new("/tmp")).is_none());
    }

    #[test]
    fn warns_below_thresholds() {
        let thresholds = ResourceConfig::default();

        assert!(resource_warnings(Some(100.0), 32.0, &thresholds).is_empty());

        let warnings = resource_warnings(Some(3.5), 2.0, &thresholds);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("Low disk space"));
        assert!(warnings[1].starts_with("Low memory"));

        let warnings = resource_warnings(None, 16.0, &thresholds);
        assert!(warnings.is_empty());
    }

    #[test]
    fn warns_when_gpu_is_missing() {
        let gpu = LoadOptions::new(false, false);
        let cpu = LoadOptions::new(false, true);

        assert!(device_warning(gpu, None).is_some_and(|w| w.starts_with("GPU requested")));
        assert!(device_warning(gpu, Some("cuda")).is_none());
        assert!(device_warning(cpu, None).is_none());
    }

    #[test]
    fn status_shows_device() {
        let model = ModelStatus {
            loaded: false,
            model_dir: PathBuf::from("/models/paligemma"),
            requested: None,
            effective: None,
            description: None,
            weight_bytes: None,
            load_count: 0,
        };
        let thresholds = ResourceConfig::default();

        let status = SystemStatus::probe(
            model.clone(),
            LoadOptions::new(true, false),
            None,
            &thresholds,
        );
        assert_eq!(status.requested, LoadOptions::new(true, false));
        assert!(status.warnings.iter().any(|w| w.starts_with("GPU requested")));
        let text = status.to_string();
        assert!(text.contains("Requested: device=gpu, 4-bit"));
        assert!(text.contains("Accelerator: none, CPU only"));

        let resident = ModelStatus {
            requested: Some(LoadOptions::new(false, true)),
            ..model
        };
        let status =
            SystemStatus::probe(resident, LoadOptions::default(), Some("cuda"), &thresholds);
        assert_eq!(status.requested, LoadOptions::new(false, true));
        assert!(status.to_string().contains("Accelerator: cuda"));
        assert!(!status.warnings.iter().any(|w| w.starts_with("GPU requested")));
    }

    #[test]
    fn missing_dir_resolves_to_existing_parent() -> std::io::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let missing = tmp_dir.path().join("not/yet/downloaded");
        assert_eq!(existing_ancestor(&missing), tmp_dir.path().canonicalize()?);
        Ok(())
    }
}
