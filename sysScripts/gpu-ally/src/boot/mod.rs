//! Bootloader detection and a uniform read / toggle / regenerate contract over
//! the three supported config formats.

pub mod toggle;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

pub use toggle::{Outcome, TargetLines, ToggleError};

use crate::config::Config;
use crate::system::SystemProbe;

/// EndeavourOS helper that rebuilds systemd-boot entries from `/etc/kernel/cmdline`.
pub const KERNEL_REINSTALL_HELPER: &str = "reinstall-kernels";
pub const GRUB_GENERATOR: &str = "grub-mkconfig";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootloaderKind {
    /// systemd-boot managed through a single cmdline file.
    SystemdBootEos,
    /// systemd-boot with hand-maintained loader entries.
    SystemdBootManual,
    Grub,
}

impl fmt::Display for BootloaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootloaderKind::SystemdBootEos => write!(f, "systemd-boot"),
            BootloaderKind::SystemdBootManual => write!(f, "systemd-boot-manual"),
            BootloaderKind::Grub => write!(f, "grub"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BootError {
    #[error("No .conf files found in {}", .0.display())]
    NoEntryFiles(PathBuf),
    #[error("'{0}' not found. Please regenerate manually.")]
    ToolMissing(&'static str),
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{tool} failed: {stderr}")]
    RegenerationFailed { tool: &'static str, stderr: String },
}

/// Per-file results of one toggle.
#[derive(Debug, Default)]
pub struct ToggleReport {
    pub files: Vec<(PathBuf, Result<Outcome, ToggleError>)>,
}

impl ToggleReport {
    /// At least one file ended up in the requested state.
    pub fn succeeded(&self) -> bool {
        self.files.iter().any(|(_, r)| r.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &ToggleError)> {
        self.files
            .iter()
            .filter_map(|(p, r)| r.as_ref().err().map(|e| (p.as_path(), e)))
    }

    pub fn changed(&self) -> usize {
        self.files
            .iter()
            .filter(|(_, r)| matches!(r, Ok(Outcome::Changed)))
            .count()
    }
}

/// Loader entry files, sorted. Empty when the directory is missing.
pub fn loader_entry_files(dir: &Path) -> Vec<PathBuf> {
    let pattern = format!("{}/*.conf", glob::Pattern::escape(&dir.to_string_lossy()));
    match glob::glob(&pattern) {
        Ok(paths) => {
            let mut files: Vec<PathBuf> = paths.flatten().filter(|p| p.is_file()).collect();
            files.sort();
            files
        }
        Err(e) => {
            tracing::warn!(error = %e, "invalid loader entry pattern");
            Vec::new()
        }
    }
}

/// Detected bootloader plus the paths it operates on.
#[derive(Debug, Clone)]
pub struct Bootloader {
    pub kind: BootloaderKind,
    eos_cmdline: PathBuf,
    loader_entries: PathBuf,
    grub_default: PathBuf,
    grub_cfg: PathBuf,
}

impl Bootloader {
    pub fn new(kind: BootloaderKind, config: &Config) -> Self {
        Self {
            kind,
            eos_cmdline: config.eos_cmdline.clone(),
            loader_entries: config.loader_entries.clone(),
            grub_default: config.grub_default.clone(),
            grub_cfg: config.grub_cfg.clone(),
        }
    }

    /// First match wins: EOS cmdline file, then manual loader entries (only
    /// when the EOS helper is absent), then GRUB.
    pub fn detect(config: &Config, probe: &dyn SystemProbe) -> Option<Self> {
        let kind = if config.eos_cmdline.exists() {
            BootloaderKind::SystemdBootEos
        } else if config.loader_entries.is_dir()
            && !loader_entry_files(&config.loader_entries).is_empty()
            && !probe.command_exists(KERNEL_REINSTALL_HELPER)
        {
            BootloaderKind::SystemdBootManual
        } else if config.grub_default.exists() {
            BootloaderKind::Grub
        } else {
            tracing::debug!("no supported bootloader config found");
            return None;
        };
        tracing::debug!(%kind, "bootloader detected");
        Some(Self::new(kind, config))
    }

    pub fn target_lines(&self) -> TargetLines {
        match self.kind {
            BootloaderKind::SystemdBootEos => TargetLines::WholeFile,
            BootloaderKind::SystemdBootManual => TargetLines::OptionsDirective,
            BootloaderKind::Grub => TargetLines::GrubCmdlineDefault,
        }
    }

    /// Files that carry the kernel arguments. Re-globbed on every call.
    pub fn target_files(&self) -> Vec<PathBuf> {
        match self.kind {
            BootloaderKind::SystemdBootEos => vec![self.eos_cmdline.clone()],
            BootloaderKind::SystemdBootManual => loader_entry_files(&self.loader_entries),
            BootloaderKind::Grub => vec![self.grub_default.clone()],
        }
    }

    /// True if any target file carries the parameter (GSP disabled).
    /// An unreadable file is an error, never a state.
    pub fn is_parameter_present(&self) -> Result<bool, ToggleError> {
        let target = self.target_lines();
        for path in self.target_files() {
            if toggle::is_present_in(&path, target)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Adds (`disable = true`) or removes the parameter in every target file.
    /// Each file is handled independently; one failure does not stop the rest.
    pub fn toggle(&self, disable: bool) -> Result<ToggleReport, BootError> {
        let files = self.target_files();
        if files.is_empty() {
            return Err(BootError::NoEntryFiles(self.loader_entries.clone()));
        }
        let target = self.target_lines();
        let files = files
            .into_iter()
            .map(|path| {
                let result = toggle::modify(&path, disable, target);
                if let Err(e) = &result {
                    tracing::warn!(path = %path.display(), error = %e, "toggle failed");
                }
                (path, result)
            })
            .collect();
        Ok(ToggleReport { files })
    }

    /// Re-runs the boot config generator for this format. Returns its output.
    pub fn regenerate(&self, probe: &dyn SystemProbe) -> Result<String, BootError> {
        let grub_cfg = self.grub_cfg.to_string_lossy();
        let (tool, args): (&'static str, Vec<&str>) = match self.kind {
            BootloaderKind::SystemdBootManual => {
                return Ok("Configuration files updated directly. No regeneration needed.".to_string());
            }
            BootloaderKind::SystemdBootEos => (KERNEL_REINSTALL_HELPER, vec![]),
            BootloaderKind::Grub => (GRUB_GENERATOR, vec!["-o", grub_cfg.as_ref()]),
        };

        if !probe.command_exists(tool) {
            return Err(BootError::ToolMissing(tool));
        }
        let output = probe
            .run(tool, &args)
            .map_err(|source| BootError::Spawn { tool, source })?;
        if !output.success {
            return Err(BootError::RegenerationFailed { tool, stderr: output.stderr.trim().to_string() });
        }
        Ok(output.stdout)
    }
}
