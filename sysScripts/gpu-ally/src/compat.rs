//! Compatibility gate for GSP firmware changes.
//!
//! Disabling GSP firmware only works with the closed Nvidia kernel module on
//! pre-Blackwell hardware. The gate is evaluated top to bottom, first match
//! wins, and must be re-run before every mutation.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::inspector::{self, OPEN_KERNEL_PACKAGES, Vendor};
use crate::system::SystemProbe;

/// Closed-module driver packages.
pub const DRIVER_WHITELIST: &[&str] = &["nvidia", "nvidia-dkms", "nvidia-lts", "nvidia-beta-dkms"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompatibilityStatus {
    #[serde(rename = "COMPATIBLE")]
    Compatible,
    #[serde(rename = "INCOMPATIBLE_BLACKWELL")]
    IncompatibleBlackwell,
    #[serde(rename = "INCOMPATIBLE_OPEN")]
    IncompatibleOpenKernel,
    #[serde(rename = "INCOMPATIBLE_NO_DRIVER")]
    IncompatibleNoDriver,
}

impl CompatibilityStatus {
    /// Machine-readable code printed by `gsp-manager --check`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Compatible => "COMPATIBLE",
            Self::IncompatibleBlackwell => "INCOMPATIBLE_BLACKWELL",
            Self::IncompatibleOpenKernel => "INCOMPATIBLE_OPEN",
            Self::IncompatibleNoDriver => "INCOMPATIBLE_NO_DRIVER",
        }
    }

    pub fn is_compatible(&self) -> bool {
        matches!(self, Self::Compatible)
    }

    /// Explanation shown before aborting a mutation.
    pub fn reason(&self) -> &'static [&'static str] {
        match self {
            Self::Compatible => &[],
            Self::IncompatibleBlackwell => &[
                "RTX 5000 (Blackwell) series detected.",
                "Disabling GSP Firmware is not supported on this architecture.",
            ],
            Self::IncompatibleOpenKernel => &[
                "Open Source Kernel Modules detected.",
                "Disabling GSP Firmware requires proprietary 'nvidia-dkms' (Closed Source) drivers.",
                "Please switch to proprietary drivers to use this feature.",
            ],
            Self::IncompatibleNoDriver => &["No supported Nvidia driver installed."],
        }
    }
}

impl fmt::Display for CompatibilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// "RTX 5000 Ada Generation" and "Quadro RTX 5000" share the number but not the architecture.
static WORKSTATION_LOOKALIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)ada generation|quadro").expect("valid regex"));

static BLACKWELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)geforce\s+rtx\s+50\d\d|blackwell").expect("valid regex")
});

/// True for consumer RTX 50xx (and anything naming itself Blackwell).
pub fn is_blackwell(gpu_name: &str) -> bool {
    if WORKSTATION_LOOKALIKE.is_match(gpu_name) {
        return false;
    }
    BLACKWELL.is_match(gpu_name)
}

/// Model names from nvidia-smi, or from lspci when nvidia-smi is unavailable.
fn nvidia_model_names(probe: &dyn SystemProbe) -> Vec<String> {
    if let Some(names) = probe.nvidia_gpu_names() {
        let names: Vec<String> = names
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        if !names.is_empty() {
            return names;
        }
    }
    inspector::parse_machine_listing(&probe.lspci_machine())
        .into_iter()
        .filter(|pci| inspector::classify_vendor(&pci.vendor) == Vendor::Nvidia)
        .map(|pci| pci.model)
        .collect()
}

pub fn check_compatibility(probe: &dyn SystemProbe) -> CompatibilityStatus {
    let closed_installed = DRIVER_WHITELIST.iter().any(|p| probe.is_installed(p));
    let open_installed = OPEN_KERNEL_PACKAGES.iter().any(|p| probe.is_installed(p));

    if !closed_installed && !open_installed {
        return CompatibilityStatus::IncompatibleNoDriver;
    }

    if let Some(name) = nvidia_model_names(probe).into_iter().find(|n| is_blackwell(n)) {
        tracing::info!(gpu = %name, "blackwell GPU detected");
        return CompatibilityStatus::IncompatibleBlackwell;
    }

    let marker = probe.kernel_module_marker();
    let marker_open = marker.as_deref().is_some_and(inspector::is_open_kernel_marker);

    // Either signal blocks. Flag the case where they contradict each other.
    if marker.is_some() && !marker_open && open_installed {
        tracing::warn!(
            "loaded module reports closed source but an open kernel package is installed; treating as open"
        );
    }
    if marker_open || open_installed {
        return CompatibilityStatus::IncompatibleOpenKernel;
    }

    CompatibilityStatus::Compatible
}
