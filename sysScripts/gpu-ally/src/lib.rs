//! GPU Ally
//!
//! Driver planning and boot-parameter management for Arch-family systems.
//!
//! The library never installs anything itself. It answers three questions and
//! hands the answers to whoever runs the commands:
//! 1. **What is in this machine?** `inspector` reads `pacman` and `lspci`
//!    and classifies every GPU by vendor and active driver.
//! 2. **Is it safe to touch the GSP firmware switch?** `compat` gates every
//!    boot-config mutation on the installed driver and the hardware generation.
//! 3. **What exactly should run?** `boot` rewrites GRUB / systemd-boot config
//!    in place to toggle `nvidia.NVreg_EnableGpuFirmware=0`, while `plan` and
//!    `sequence` turn a driver request into a fail-fast shell chain.
//!
//! Nothing is cached between calls: each operation re-reads the live system
//! through a [`system::SystemProbe`].

pub mod boot;
pub mod compat;
pub mod config;
pub mod gsp;
pub mod inspector;
pub mod plan;
pub mod report;
pub mod sequence;
pub mod session;
pub mod system;

/// The kernel parameter whose presence disables GSP firmware.
pub const GSP_PARAM: &str = "nvidia.NVreg_EnableGpuFirmware=0";

pub use boot::{BootError, Bootloader, BootloaderKind, ToggleError, ToggleReport};
pub use compat::{CompatibilityStatus, check_compatibility};
pub use config::Config;
pub use inspector::{DriverVariant, GpuDevice, Inspection, Vendor, inspect};
pub use plan::{DriverType, InstallationPlan, PlanEnv, Workload, build_plan};
pub use sequence::{chain, linearize};
pub use session::Session;
pub use system::{HostSystem, SystemProbe};

/// Log filter: `RUST_LOG` directives when set, otherwise `warn`. `verbose`
/// adds `debug` for this crate on top of either.
pub fn log_filter(rust_log: Option<&str>, verbose: bool) -> tracing_subscriber::EnvFilter {
    let mut filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::WARN.into())
        .parse_lossy(rust_log.unwrap_or_default());
    if verbose {
        if let Ok(directive) = "gpu_ally=debug".parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Installs the stderr log subscriber using [`log_filter`].
pub fn init_tracing(verbose: bool) {
    let rust_log = std::env::var(tracing_subscriber::EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(rust_log.as_deref(), verbose))
        .with_writer(std::io::stderr)
        .init();
}
