//! Installation plan builder.
//!
//! Turns (vendor, workloads, driver type) into a typed plan. Nothing here
//! touches the system; distro and AUR helper are detected up front into
//! [`PlanEnv`] so the branches below stay pure and exhaustive.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::config::Config;
use crate::inspector::Vendor;
use crate::system::SystemProbe;

// --- Package sets ---
// Const for auditing and immutability

/// Installed standard driver packages that clash with the beta set.
pub const STANDARD_NVIDIA_PACKAGES: &[&str] = &[
    "nvidia", "nvidia-dkms", "nvidia-lts", "nvidia-open", "nvidia-open-dkms",
    "nvidia-utils", "lib32-nvidia-utils", "nvidia-settings",
    "opencl-nvidia", "lib32-opencl-nvidia",
];

/// AUR beta driver packages that clash with the standard set.
pub const BETA_NVIDIA_PACKAGES: &[&str] = &[
    "nvidia-beta-dkms", "nvidia-utils-beta", "lib32-nvidia-utils-beta",
    "nvidia-settings-beta", "opencl-nvidia-beta", "lib32-opencl-nvidia-beta",
];

const NVIDIA_UTILITIES: &[&str] = &["nvidia-utils", "nvidia-settings"];
const NVIDIA_GAMING: &[&str] = &["lib32-nvidia-utils"];
const NVIDIA_AI: &[&str] = &["cuda", "cudnn", "nvidia-container-toolkit"];

const NVIDIA_BETA_CORE: &[&str] = &["nvidia-beta-dkms", "nvidia-utils-beta", "nvidia-settings-beta"];
const NVIDIA_BETA_GAMING: &[&str] = &["lib32-nvidia-utils-beta"];
const NVIDIA_BETA_AI_AUR: &[&str] = &["opencl-nvidia-beta"];

pub const AMD_GAMING: &[&str] = &[
    "mesa", "lib32-mesa", "vulkan-radeon", "lib32-vulkan-radeon", "xf86-video-amdgpu",
];
pub const AMD_AI: &[&str] = &["rocm-hip-sdk", "rocm-opencl-sdk"];

pub const INTEL_GAMING: &[&str] = &[
    "mesa", "lib32-mesa", "vulkan-intel", "lib32-vulkan-intel", "intel-media-driver",
];
pub const INTEL_AI: &[&str] = &["intel-compute-runtime", "level-zero-loader"];

const DEFAULT_GROUPS: &[&str] = &["video", "render"];

pub const NVIDIA_HELPER: &str = "nvidia-inst";

// --- Request types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Workload {
    Gaming,
    Ai,
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Workload::Gaming => write!(f, "Gaming"),
            Workload::Ai => write!(f, "AI / Compute"),
        }
    }
}

pub type Workloads = BTreeSet<Workload>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DriverType {
    Open,
    Proprietary,
    Beta,
}

impl fmt::Display for DriverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverType::Open => write!(f, "Open kernel module"),
            DriverType::Proprietary => write!(f, "Proprietary (closed)"),
            DriverType::Beta => write!(f, "Beta (AUR)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Distro {
    EndeavourOs,
    Arch,
    Other(String),
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distro::EndeavourOs => write!(f, "endeavouros"),
            Distro::Arch => write!(f, "arch"),
            Distro::Other(id) => write!(f, "{id}"),
        }
    }
}

/// Reads `ID=` from os-release content.
pub fn parse_os_release(content: &str) -> Distro {
    let id = content
        .lines()
        .find_map(|l| l.strip_prefix("ID="))
        .map(|v| v.trim().trim_matches(|c| c == '"' || c == '\'').to_lowercase());
    match id.as_deref() {
        Some("endeavouros") => Distro::EndeavourOs,
        Some("arch") => Distro::Arch,
        Some(other) => Distro::Other(other.to_string()),
        None => Distro::Other("unknown".to_string()),
    }
}

pub fn detect_distro(os_release: &Path) -> Distro {
    match fs::read_to_string(os_release) {
        Ok(content) => parse_os_release(&content),
        Err(e) => {
            tracing::debug!(error = %e, "os-release unreadable");
            Distro::Other("unknown".to_string())
        }
    }
}

/// First configured AUR helper present on PATH.
pub fn detect_aur_helper(probe: &dyn SystemProbe, helpers: &[String]) -> Option<String> {
    helpers.iter().find(|h| probe.command_exists(h)).cloned()
}

/// Facts about the host that steer plan construction.
#[derive(Debug, Clone)]
pub struct PlanEnv {
    pub distro: Distro,
    pub aur_helper: Option<String>,
    pub services: Vec<String>,
}

impl PlanEnv {
    pub fn detect(config: &Config, probe: &dyn SystemProbe) -> Self {
        Self {
            distro: detect_distro(&config.os_release),
            aur_helper: detect_aur_helper(probe, &config.aur_helpers),
            services: config.services.clone(),
        }
    }
}

// --- Plan ---

/// Which Nvidia package family a plan installs. Drives conflict clearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NvidiaFamily {
    Standard,
    Beta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PostInstall {
    /// Expanded by the sequencer into whichever initramfs tool is present.
    RegenerateInitramfs,
    Shell(String),
}

/// EndeavourOS `nvidia-inst` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NvidiaInst {
    pub open: bool,
    pub lib32: bool,
}

impl NvidiaInst {
    pub fn command(&self) -> String {
        let mut parts = vec![NVIDIA_HELPER, if self.open { "--open" } else { "--closed" }];
        if self.lib32 {
            parts.push("--32");
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallationPlan {
    pub vendor: Vendor,
    pub packages: Vec<String>,
    pub aur_packages: Vec<String>,
    pub groups: Vec<String>,
    pub services: Vec<String>,
    pub post_install: Vec<PostInstall>,
    pub warnings: Vec<String>,
    pub nvidia_helper: Option<NvidiaInst>,
    pub nvidia_family: Option<NvidiaFamily>,
    pub aur_helper: Option<String>,
}

impl InstallationPlan {
    fn new(vendor: Vendor, env: &PlanEnv) -> Self {
        Self {
            vendor,
            packages: Vec::new(),
            aur_packages: Vec::new(),
            groups: DEFAULT_GROUPS.iter().map(|g| g.to_string()).collect(),
            services: env.services.clone(),
            post_install: Vec::new(),
            warnings: Vec::new(),
            nvidia_helper: None,
            nvidia_family: None,
            aur_helper: env.aur_helper.clone(),
        }
    }

    fn add(&mut self, packages: &[&str]) {
        push_unique(&mut self.packages, packages);
    }

    fn add_aur(&mut self, packages: &[&str]) {
        push_unique(&mut self.aur_packages, packages);
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// True when nothing would be installed or run beyond group membership.
    pub fn installs_nothing(&self) -> bool {
        self.packages.is_empty()
            && self.aur_packages.is_empty()
            && self.nvidia_helper.is_none()
            && self.post_install.is_empty()
    }
}

fn push_unique(target: &mut Vec<String>, packages: &[&str]) {
    for pkg in packages {
        if !target.iter().any(|p| p == pkg) {
            target.push(pkg.to_string());
        }
    }
}

pub fn build_plan(
    vendor: Vendor,
    workloads: &Workloads,
    driver: DriverType,
    env: &PlanEnv,
) -> InstallationPlan {
    let gaming = workloads.contains(&Workload::Gaming);
    let ai = workloads.contains(&Workload::Ai);
    let mut plan = InstallationPlan::new(vendor, env);

    match vendor {
        Vendor::Nvidia => match (driver, &env.distro) {
            (DriverType::Beta, _) => {
                plan.nvidia_family = Some(NvidiaFamily::Beta);
                plan.add_aur(NVIDIA_BETA_CORE);
                if gaming {
                    plan.add_aur(NVIDIA_BETA_GAMING);
                }
                if ai {
                    plan.add_aur(NVIDIA_BETA_AI_AUR);
                    plan.add(NVIDIA_AI);
                }
                plan.post_install.push(PostInstall::RegenerateInitramfs);
                plan.warn(
                    "Beta drivers come from the AUR and replace any installed standard Nvidia packages; \
                     existing nvidia-dkms/nvidia-utils will be removed first.",
                );
                if env.aur_helper.is_none() {
                    plan.warn("No AUR helper (paru or yay) found. Install one before applying this plan.");
                }
            }
            (DriverType::Open | DriverType::Proprietary, Distro::EndeavourOs) => {
                plan.nvidia_family = Some(NvidiaFamily::Standard);
                plan.nvidia_helper = Some(NvidiaInst { open: driver == DriverType::Open, lib32: gaming });
                // nvidia-inst does not manage compute packages
                if ai {
                    plan.add(NVIDIA_AI);
                }
            }
            (DriverType::Open | DriverType::Proprietary, _) => {
                plan.nvidia_family = Some(NvidiaFamily::Standard);
                plan.add(&[if driver == DriverType::Open { "nvidia-open-dkms" } else { "nvidia-dkms" }]);
                plan.add(NVIDIA_UTILITIES);
                if gaming {
                    plan.add(NVIDIA_GAMING);
                }
                if ai {
                    plan.add(NVIDIA_AI);
                }
                plan.post_install.push(PostInstall::RegenerateInitramfs);
            }
        },
        Vendor::Amd => {
            if gaming {
                plan.add(AMD_GAMING);
            }
            if ai {
                plan.add(AMD_AI);
                plan.warn(
                    "Consumer AMD cards may require HSA_OVERRIDE_GFX_VERSION environment variable for AI/ROCm workloads.",
                );
            }
        }
        Vendor::Intel => {
            if gaming {
                plan.add(INTEL_GAMING);
            }
            if ai {
                plan.add(INTEL_AI);
            }
        }
        Vendor::Unknown => {
            plan.warn("No supported GPU vendor detected; nothing to install.");
        }
    }

    tracing::debug!(
        %vendor,
        packages = plan.packages.len(),
        aur = plan.aur_packages.len(),
        "installation plan built"
    );
    plan
}
