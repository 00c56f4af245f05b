//! Combined system report for `gpu-ally inspect`.

use std::fmt;

use serde::Serialize;

use crate::boot::{Bootloader, BootloaderKind};
use crate::compat::{self, CompatibilityStatus};
use crate::inspector::{self, GpuDevice};
use crate::session::Session;
use crate::system::SystemProbe;

const GSP_VERSION_FIELD: &str = "GSP Firmware Version";

/// What the loaded driver says about GSP firmware right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "version", rename_all = "lowercase")]
pub enum GspRuntime {
    Enabled(String),
    Disabled,
    /// nvidia-smi ran but did not report the field.
    Unknown,
    /// nvidia-smi missing or failing.
    Unavailable,
}

impl fmt::Display for GspRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GspRuntime::Enabled(v) => write!(f, "Enabled (firmware {v})"),
            GspRuntime::Disabled => write!(f, "Disabled"),
            GspRuntime::Unknown => write!(f, "Unknown (field missing in nvidia-smi)"),
            GspRuntime::Unavailable => write!(f, "N/A (nvidia-smi unavailable)"),
        }
    }
}

/// Reads the `GSP Firmware Version` line of `nvidia-smi -q`.
pub fn parse_gsp_runtime(query: &str) -> GspRuntime {
    let Some(line) = query.lines().find(|l| l.contains(GSP_VERSION_FIELD)) else {
        return GspRuntime::Unknown;
    };
    match line.split_once(':').map(|(_, v)| v.trim()) {
        Some(v) if !v.is_empty() && v != "N/A" => GspRuntime::Enabled(v.to_string()),
        _ => GspRuntime::Disabled,
    }
}

pub fn gsp_runtime(probe: &dyn SystemProbe) -> GspRuntime {
    probe.nvidia_query().map_or(GspRuntime::Unavailable, |q| parse_gsp_runtime(&q))
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemReport {
    pub devices: Vec<GpuDevice>,
    pub installed_packages: Vec<String>,
    pub compatibility: CompatibilityStatus,
    pub bootloader: Option<BootloaderKind>,
    /// True when the boot config carries the disable parameter. `None` when
    /// no bootloader was found or its config could not be read.
    pub gsp_disabled_in_config: Option<bool>,
    pub gsp_runtime: GspRuntime,
}

impl SystemReport {
    pub fn collect(session: &Session) -> Self {
        let probe = session.probe();
        let inspection = inspector::inspect(probe);
        let bootloader = Bootloader::detect(&session.config, probe);
        Self {
            devices: inspection.devices,
            installed_packages: inspection.installed_packages.into_iter().collect(),
            compatibility: compat::check_compatibility(probe),
            gsp_disabled_in_config: bootloader.as_ref().and_then(|b| match b.is_parameter_present() {
                Ok(state) => Some(state),
                Err(e) => {
                    tracing::warn!(error = %e, "could not read boot config");
                    None
                }
            }),
            bootloader: bootloader.map(|b| b.kind),
            gsp_runtime: gsp_runtime(probe),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::CannedSystem;

    #[test]
    fn runtime_from_query() {
        let q = "GPU 00000000:01:00.0\n    GSP Firmware Version                  : 550.78\n";
        assert_eq!(parse_gsp_runtime(q), GspRuntime::Enabled("550.78".into()));
        assert_eq!(parse_gsp_runtime("    GSP Firmware Version : N/A\n"), GspRuntime::Disabled);
        assert_eq!(parse_gsp_runtime("    GSP Firmware Version :\n"), GspRuntime::Disabled);
        assert_eq!(parse_gsp_runtime("    Driver Version : 550.78\n"), GspRuntime::Unknown);
    }

    #[test]
    fn runtime_unavailable_without_smi() {
        assert_eq!(gsp_runtime(&CannedSystem::default()), GspRuntime::Unavailable);
    }

    #[test]
    fn report_serializes_codes() {
        let report = SystemReport {
            devices: Vec::new(),
            installed_packages: vec!["nvidia-dkms".into()],
            compatibility: CompatibilityStatus::IncompatibleOpenKernel,
            bootloader: Some(BootloaderKind::SystemdBootManual),
            gsp_disabled_in_config: Some(false),
            gsp_runtime: GspRuntime::Enabled("560.35".into()),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["compatibility"], "INCOMPATIBLE_OPEN");
        assert_eq!(json["bootloader"], "systemd-boot-manual");
        assert_eq!(json["gsp_runtime"]["state"], "enabled");
        assert_eq!(json["gsp_runtime"]["version"], "560.35");
    }
}
