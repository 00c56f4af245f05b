use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

// --- Config Models ---

/// Paths and preferences for gpu-ally.
///
/// Lives in the `[gpu_ally]` table of the shared dotfiles config. Every key is
/// optional; a missing file behaves like an empty table.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// GRUB defaults file holding `GRUB_CMDLINE_LINUX_DEFAULT`.
    pub grub_default: PathBuf,
    /// Output of `grub-mkconfig`.
    pub grub_cfg: PathBuf,
    /// EndeavourOS single-line kernel cmdline.
    pub eos_cmdline: PathBuf,
    /// systemd-boot loader entries directory (`*.conf`).
    pub loader_entries: PathBuf,
    /// Runtime marker written by the loaded Nvidia kernel module.
    pub nvidia_version_marker: PathBuf,
    pub os_release: PathBuf,
    /// AUR helpers in probe order.
    pub aur_helpers: Vec<String>,
    /// Extra units to enable after a driver install.
    pub services: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grub_default: PathBuf::from("/etc/default/grub"),
            grub_cfg: PathBuf::from("/boot/grub/grub.cfg"),
            eos_cmdline: PathBuf::from("/etc/kernel/cmdline"),
            loader_entries: PathBuf::from("/boot/loader/entries"),
            nvidia_version_marker: PathBuf::from("/proc/driver/nvidia/version"),
            os_release: PathBuf::from("/etc/os-release"),
            aur_helpers: vec!["paru".to_string(), "yay".to_string()],
            services: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
struct GlobalConfig {
    #[serde(default)]
    gpu_ally: Config,
}

// --- Config Loader ---

/// Default location shared with the other dotfiles tools.
pub fn default_config_path() -> Result<PathBuf> {
    let path = dirs::home_dir()
        .context("Cannot find home dir")?
        .join(".config/rust-dotfiles/config.toml");
    Ok(path)
}

/// Loads `[gpu_ally]` from `path`, falling back to defaults if the file is absent.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    parse_config(&config_str)
}

pub fn parse_config(config_str: &str) -> Result<Config> {
    let global: GlobalConfig =
        toml::from_str(config_str).context("Failed to parse config.toml")?;
    Ok(global.gpu_ally)
}
