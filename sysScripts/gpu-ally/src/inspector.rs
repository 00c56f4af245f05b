//! Hardware & package inspection.
//!
//! Joins two `lspci` views: `-mm` gives vendor/model per bus slot, `-k` gives the
//! kernel driver bound to each slot. Packages come from `pacman -Qq`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::system::SystemProbe;

/// Driver packages worth reporting; everything else in `pacman -Qq` is noise here.
pub const RELEVANT_PACKAGES: &[&str] = &[
    "nvidia", "nvidia-lts", "nvidia-dkms", "nvidia-open", "nvidia-open-dkms",
    "nvidia-beta-dkms", "mesa",
];

pub const BETA_DRIVER_PACKAGE: &str = "nvidia-beta-dkms";
pub const OPEN_KERNEL_PACKAGES: &[&str] = &["nvidia-open", "nvidia-open-dkms"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Nvidia,
    Amd,
    Intel,
    Unknown,
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vendor::Nvidia => write!(f, "NVIDIA"),
            Vendor::Amd => write!(f, "AMD"),
            Vendor::Intel => write!(f, "INTEL"),
            Vendor::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverVariant {
    OpenSource,
    ProprietaryClosed,
    ProprietaryOpenKernel,
    Beta,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuDevice {
    /// PCI bus address, e.g. `01:00.0`.
    pub slot: String,
    pub vendor: Vendor,
    /// Vendor string exactly as lspci printed it.
    pub vendor_name: String,
    pub model: String,
    pub active_driver: Option<String>,
    pub driver_variant: DriverVariant,
}

impl GpuDevice {
    /// Human label for the driver variant column.
    pub fn variant_label(&self) -> &'static str {
        match self.driver_variant {
            DriverVariant::OpenSource => "Open Source (Community)",
            DriverVariant::ProprietaryClosed => "Proprietary (Closed Source)",
            DriverVariant::ProprietaryOpenKernel => "Proprietary (Open Kernel Module)",
            DriverVariant::Beta => "Nvidia Beta (Proprietary)",
            DriverVariant::Unknown if self.active_driver.as_deref() == Some("nvidia") => {
                "Proprietary (Unknown)"
            }
            DriverVariant::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Inspection {
    pub devices: Vec<GpuDevice>,
    pub installed_packages: BTreeSet<String>,
}

impl Inspection {
    /// Vendor used for planning: the first NVIDIA device wins, otherwise the
    /// first device found.
    pub fn primary_vendor(&self) -> Vendor {
        if self.devices.iter().any(|d| d.vendor == Vendor::Nvidia) {
            return Vendor::Nvidia;
        }
        self.devices.first().map_or(Vendor::Unknown, |d| d.vendor)
    }
}

// --- Parsing ---

static MM_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]*)"|(\S+)"#).expect("valid regex"));

// `01:00.0 VGA ...` or `0000:01:00.0 VGA ...`
static SLOT_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:[0-9a-fA-F]{4}:)?[0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-7])\s")
        .expect("valid regex")
});

static VENDOR_ALIASES: LazyLock<Vec<(Regex, Vendor)>> = LazyLock::new(|| {
    [
        (r"(?i)\bnvidia\b", Vendor::Nvidia),
        (r"(?i)\bamd\b|advanced micro devices|\bati\b", Vendor::Amd),
        (r"(?i)\bintel\b", Vendor::Intel),
    ]
    .into_iter()
    .map(|(pattern, vendor)| (Regex::new(pattern).expect("valid regex"), vendor))
    .collect()
});

const KERNEL_DRIVER_KEY: &str = "Kernel driver in use:";

/// One display-class row from `lspci -mm`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciDisplay {
    pub slot: String,
    pub class: String,
    pub vendor: String,
    pub model: String,
}

fn normalize_slot(slot: &str) -> &str {
    slot.strip_prefix("0000:").unwrap_or(slot)
}

/// Splits an `lspci -mm` line into its quoted / bare fields.
pub fn tokenize_machine_line(line: &str) -> Vec<String> {
    MM_TOKEN
        .captures_iter(line)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).map(|m| m.as_str().to_string()))
        .collect()
}

fn is_display_class(class: &str) -> bool {
    class.contains("VGA") || class.contains("3D") || class.contains("Display")
}

pub fn parse_machine_listing(output: &str) -> Vec<PciDisplay> {
    output
        .lines()
        .filter_map(|line| {
            let fields = tokenize_machine_line(line);
            if fields.len() < 4 || !is_display_class(&fields[1]) {
                return None;
            }
            Some(PciDisplay {
                slot: normalize_slot(&fields[0]).to_string(),
                class: fields[1].clone(),
                vendor: fields[2].clone(),
                model: fields[3].clone(),
            })
        })
        .collect()
}

/// Maps slot -> bound kernel driver from `lspci -k`.
///
/// A slot's block runs from its header line to the next line matching the
/// slot-header pattern; indented detail lines never start a new block.
pub fn parse_kernel_drivers(output: &str) -> HashMap<String, String> {
    let mut drivers = HashMap::new();
    let mut current: Option<String> = None;

    for line in output.lines() {
        if let Some(caps) = SLOT_HEADER.captures(line) {
            current = Some(normalize_slot(&caps[1]).to_string());
            continue;
        }
        let Some(slot) = current.as_ref() else { continue };
        if let Some((_, driver)) = line.split_once(KERNEL_DRIVER_KEY) {
            drivers.entry(slot.clone()).or_insert_with(|| driver.trim().to_string());
        }
    }
    drivers
}

pub fn classify_vendor(name: &str) -> Vendor {
    VENDOR_ALIASES
        .iter()
        .find(|(re, _)| re.is_match(name))
        .map_or(Vendor::Unknown, |(_, vendor)| *vendor)
}

/// True if the Nvidia version marker describes the open kernel module.
pub fn is_open_kernel_marker(content: &str) -> bool {
    content.contains("Open Kernel Module") || content.contains("Open Source")
}

/// Works out which flavour of driver is bound.
///
/// For `nvidia` the installed packages are consulted first (beta, then open),
/// then the runtime marker.
pub fn classify_variant(
    driver: Option<&str>,
    packages: &BTreeSet<String>,
    marker: Option<&str>,
) -> DriverVariant {
    match driver {
        Some("nouveau" | "amdgpu" | "radeon" | "i915" | "xe") => DriverVariant::OpenSource,
        Some("nvidia") => {
            if packages.contains(BETA_DRIVER_PACKAGE) {
                DriverVariant::Beta
            } else if OPEN_KERNEL_PACKAGES.iter().any(|p| packages.contains(*p)) {
                DriverVariant::ProprietaryOpenKernel
            } else {
                match marker {
                    Some(m) if is_open_kernel_marker(m) => DriverVariant::ProprietaryOpenKernel,
                    Some(_) => DriverVariant::ProprietaryClosed,
                    None => DriverVariant::Unknown,
                }
            }
        }
        _ => DriverVariant::Unknown,
    }
}

/// Fresh snapshot of GPUs and driver packages. Never fails; missing tools
/// just produce fewer results.
pub fn inspect(probe: &dyn SystemProbe) -> Inspection {
    let installed_packages: BTreeSet<String> = probe
        .installed_packages()
        .into_iter()
        .filter(|p| RELEVANT_PACKAGES.contains(&p.as_str()))
        .collect();

    let drivers = parse_kernel_drivers(&probe.lspci_kernel());
    let marker = probe.kernel_module_marker();

    let devices = parse_machine_listing(&probe.lspci_machine())
        .into_iter()
        .map(|pci| {
            let active_driver = drivers.get(&pci.slot).cloned();
            let driver_variant =
                classify_variant(active_driver.as_deref(), &installed_packages, marker.as_deref());
            GpuDevice {
                vendor: classify_vendor(&pci.vendor),
                slot: pci.slot,
                vendor_name: pci.vendor,
                model: pci.model,
                active_driver,
                driver_variant,
            }
        })
        .collect::<Vec<_>>();

    tracing::debug!(count = devices.len(), "gpu inspection finished");
    Inspection { devices, installed_packages }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::CannedSystem;

    const LSPCI_MM: &str = r#"00:00.0 "Host bridge" "Intel Corporation" "Raptor Lake-S Host Bridge" -r01 "ASUSTeK Computer Inc." "Device 8882"
00:02.0 "VGA compatible controller" "Intel Corporation" "Raptor Lake-S GT1 [UHD Graphics 770]" -r04 "ASUSTeK Computer Inc." "Device 8882"
01:00.0 "VGA compatible controller" "NVIDIA Corporation" "AD104 [GeForce RTX 4070]" -ra1 "Micro-Star International Co., Ltd. [MSI]" "Device 5110"
01:00.1 "Audio device" "NVIDIA Corporation" "AD104 High Definition Audio Controller" -ra1 "Micro-Star International Co., Ltd. [MSI]" "Device 5110"
"#;

    const LSPCI_K: &str = "00:00.0 Host bridge: Intel Corporation Raptor Lake-S Host Bridge (rev 01)
\tSubsystem: ASUSTeK Computer Inc. Device 8882
00:02.0 VGA compatible controller: Intel Corporation Raptor Lake-S GT1 [UHD Graphics 770] (rev 04)
\tDeviceName: Onboard - Video
\tSubsystem: ASUSTeK Computer Inc. Device 8882
\tKernel driver in use: i915
\tKernel modules: i915, xe
01:00.0 VGA compatible controller: NVIDIA Corporation AD104 [GeForce RTX 4070] (rev a1)
\tSubsystem: Micro-Star International Co., Ltd. [MSI] Device 5110
3 extra descriptive lines that start with a digit
\tKernel driver in use: nvidia
\tKernel modules: nouveau, nvidia_drm, nvidia
01:00.1 Audio device: NVIDIA Corporation AD104 High Definition Audio Controller (rev a1)
\tKernel driver in use: snd_hda_intel
";

    #[test]
    fn tokenizes_quoted_fields() {
        let fields = tokenize_machine_line(r#"01:00.0 "VGA compatible controller" "NVIDIA Corporation" "AD104 [GeForce RTX 4070]" -ra1"#);
        assert_eq!(fields[0], "01:00.0");
        assert_eq!(fields[1], "VGA compatible controller");
        assert_eq!(fields[3], "AD104 [GeForce RTX 4070]");
        assert_eq!(fields[4], "-ra1");
    }

    #[test]
    fn machine_listing_keeps_only_display_devices() {
        let gpus = parse_machine_listing(LSPCI_MM);
        let slots: Vec<_> = gpus.iter().map(|g| g.slot.as_str()).collect();
        assert_eq!(slots, vec!["00:02.0", "01:00.0"]);
    }

    #[test]
    fn kernel_driver_blocks_end_at_next_header() {
        let drivers = parse_kernel_drivers(LSPCI_K);
        assert_eq!(drivers.get("00:02.0").map(String::as_str), Some("i915"));
        assert_eq!(drivers.get("01:00.0").map(String::as_str), Some("nvidia"));
        assert_eq!(drivers.get("01:00.1").map(String::as_str), Some("snd_hda_intel"));
        assert!(!drivers.contains_key("00:00.0"));
    }

    #[test]
    fn domain_prefixed_slots_are_normalized() {
        let drivers = parse_kernel_drivers(
            "0000:03:00.0 VGA compatible controller: AMD\n\tKernel driver in use: amdgpu\n",
        );
        assert_eq!(drivers.get("03:00.0").map(String::as_str), Some("amdgpu"));
    }

    #[test]
    fn vendor_aliases() {
        assert_eq!(classify_vendor("NVIDIA Corporation"), Vendor::Nvidia);
        assert_eq!(classify_vendor("Advanced Micro Devices, Inc. [AMD/ATI]"), Vendor::Amd);
        assert_eq!(classify_vendor("ATI Technologies Inc"), Vendor::Amd);
        assert_eq!(classify_vendor("intel corporation"), Vendor::Intel);
        assert_eq!(classify_vendor("Matrox Electronics Systems Ltd."), Vendor::Unknown);
    }

    #[test]
    fn corporation_is_not_ati() {
        // "CORPORATION" contains the letters A-T-I
        assert_eq!(classify_vendor("Intel Corporation"), Vendor::Intel);
        assert_eq!(classify_vendor("Some Corporation"), Vendor::Unknown);
    }

    #[test]
    fn variant_priority_beta_then_open_then_marker() {
        let mut pkgs: BTreeSet<String> = ["nvidia-beta-dkms", "nvidia-open-dkms"]
            .into_iter()
            .map(String::from)
            .collect();
        let closed_marker = Some("NVRM version: NVIDIA UNIX x86_64 Kernel Module  550.78");
        assert_eq!(classify_variant(Some("nvidia"), &pkgs, closed_marker), DriverVariant::Beta);

        pkgs.remove("nvidia-beta-dkms");
        assert_eq!(
            classify_variant(Some("nvidia"), &pkgs, closed_marker),
            DriverVariant::ProprietaryOpenKernel
        );

        pkgs.clear();
        assert_eq!(
            classify_variant(Some("nvidia"), &pkgs, closed_marker),
            DriverVariant::ProprietaryClosed
        );
        assert_eq!(
            classify_variant(Some("nvidia"), &pkgs, Some("NVIDIA UNIX Open Kernel Module for x86_64")),
            DriverVariant::ProprietaryOpenKernel
        );
        assert_eq!(classify_variant(Some("nvidia"), &pkgs, None), DriverVariant::Unknown);
        assert_eq!(classify_variant(Some("nouveau"), &pkgs, None), DriverVariant::OpenSource);
    }

    #[test]
    fn inspect_joins_both_listings() {
        let probe = CannedSystem {
            lspci_mm: LSPCI_MM.to_string(),
            lspci_k: LSPCI_K.to_string(),
            marker: Some("NVRM version: NVIDIA UNIX x86_64 Kernel Module  550.78".to_string()),
            ..Default::default()
        }
        .with_packages(&["nvidia-dkms", "mesa", "firefox"]);

        let inspection = inspect(&probe);
        assert_eq!(inspection.devices.len(), 2);
        assert_eq!(inspection.primary_vendor(), Vendor::Nvidia);
        assert!(!inspection.installed_packages.contains("firefox"));

        let nvidia = &inspection.devices[1];
        assert_eq!(nvidia.active_driver.as_deref(), Some("nvidia"));
        assert_eq!(nvidia.driver_variant, DriverVariant::ProprietaryClosed);
        assert_eq!(nvidia.variant_label(), "Proprietary (Closed Source)");
    }

    #[test]
    fn missing_tools_give_empty_inspection() {
        let inspection = inspect(&CannedSystem::default());
        assert!(inspection.devices.is_empty());
        assert_eq!(inspection.primary_vendor(), Vendor::Unknown);
    }
}
