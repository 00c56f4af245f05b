//! Gated GSP firmware switch: compatibility check, toggle, regenerate, verify.

use thiserror::Error;

use crate::boot::{BootError, Bootloader, ToggleError, ToggleReport};
use crate::compat::{self, CompatibilityStatus};
use crate::config::Config;
use crate::system::SystemProbe;

#[derive(Debug, Error)]
pub enum GspError {
    #[error("compatibility check failed: {0}")]
    Incompatible(CompatibilityStatus),
    #[error("No bootloader detected.")]
    NoBootloader,
    #[error("Root privileges required.")]
    NotRoot,
    #[error(transparent)]
    Boot(#[from] BootError),
    #[error("could not read boot config: {0}")]
    State(#[from] ToggleError),
    #[error("no boot config file could be updated")]
    ToggleFailed(ToggleReport),
    #[error("Config updated but regeneration failed.")]
    Regeneration { report: ToggleReport, source: BootError },
    #[error("boot config still reads GSP {found} after the change")]
    Verification { report: ToggleReport, found: &'static str },
}

impl GspError {
    /// Per-file results when the toggle got far enough to produce them.
    pub fn report(&self) -> Option<&ToggleReport> {
        match self {
            GspError::ToggleFailed(report)
            | GspError::Regeneration { report, .. }
            | GspError::Verification { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// `DISABLED` when the parameter is present, `ENABLED` otherwise.
pub fn state_label(disabled: bool) -> &'static str {
    if disabled { "DISABLED" } else { "ENABLED" }
}

/// Configured state read from disk: `true` when GSP is disabled.
pub fn configured_disabled(boot: &Bootloader) -> Result<bool, GspError> {
    Ok(boot.is_parameter_present()?)
}

/// Runs the gate and detects the bootloader. Both are re-evaluated on every call.
pub fn prepare(config: &Config, probe: &dyn SystemProbe) -> Result<Bootloader, GspError> {
    let status = compat::check_compatibility(probe);
    if !status.is_compatible() {
        return Err(GspError::Incompatible(status));
    }
    Bootloader::detect(config, probe).ok_or(GspError::NoBootloader)
}

/// Result of a successful switch.
#[derive(Debug)]
pub struct Applied {
    pub report: ToggleReport,
    pub regeneration_output: String,
}

/// Adds (`disable`) or removes the parameter, regenerates, then re-reads the
/// config from disk to confirm it reflects the request.
pub fn apply(
    boot: &Bootloader,
    probe: &dyn SystemProbe,
    disable: bool,
    is_root: bool,
) -> Result<Applied, GspError> {
    if !is_root {
        return Err(GspError::NotRoot);
    }
    tracing::info!(kind = %boot.kind, disable, "applying GSP change");

    let report = boot.toggle(disable)?;
    if !report.succeeded() {
        return Err(GspError::ToggleFailed(report));
    }

    let regeneration_output = match boot.regenerate(probe) {
        Ok(out) => out,
        Err(source) => return Err(GspError::Regeneration { report, source }),
    };

    let now_disabled = match boot.is_parameter_present() {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(error = %e, "could not re-read boot config");
            return Err(GspError::Verification { report, found: "UNREADABLE" });
        }
    };
    if now_disabled != disable {
        return Err(GspError::Verification { report, found: state_label(now_disabled) });
    }
    Ok(Applied { report, regeneration_output })
}
