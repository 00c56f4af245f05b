//! Read-only access to the live system.
//!
//! Every external query the core makes goes through [`SystemProbe`]. The real
//! implementation shells out to `pacman`, `lspci`, `nvidia-smi` and `which`;
//! failures degrade to empty answers because discovery is advisory.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Captured result of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

pub trait SystemProbe {
    /// Exact-name membership check (`pacman -Qq <pkg>`).
    fn is_installed(&self, package: &str) -> bool;
    /// Every installed package name. Empty when pacman is unavailable.
    fn installed_packages(&self) -> BTreeSet<String>;
    /// `lspci -mm` output.
    fn lspci_machine(&self) -> String;
    /// `lspci -k` output.
    fn lspci_kernel(&self) -> String;
    /// One GPU name per line from nvidia-smi.
    fn nvidia_gpu_names(&self) -> Option<String>;
    /// Full `nvidia-smi -q` report.
    fn nvidia_query(&self) -> Option<String>;
    /// Contents of the Nvidia kernel module version marker.
    fn kernel_module_marker(&self) -> Option<String>;
    fn command_exists(&self, command: &str) -> bool;
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;
}

// --- Host implementation ---

/// Probe backed by the running machine.
#[derive(Debug, Clone)]
pub struct HostSystem {
    marker_path: PathBuf,
}

impl HostSystem {
    pub fn new(marker_path: impl Into<PathBuf>) -> Self {
        Self { marker_path: marker_path.into() }
    }
}

/// Runs a command quietly and returns stdout only if it exited successfully.
fn capture(program: &str, args: &[&str]) -> Option<String> {
    match Command::new(program).args(args).stderr(Stdio::null()).output() {
        Ok(o) if o.status.success() => Some(String::from_utf8_lossy(&o.stdout).into_owned()),
        Ok(o) => {
            tracing::debug!(program, ?args, code = ?o.status.code(), "query exited non-zero");
            None
        }
        Err(e) => {
            tracing::debug!(program, error = %e, "query could not be started");
            None
        }
    }
}

impl SystemProbe for HostSystem {
    fn is_installed(&self, package: &str) -> bool {
        Command::new("pacman")
            .args(["-Qq", package])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn installed_packages(&self) -> BTreeSet<String> {
        match capture("pacman", &["-Qq"]) {
            Some(out) => out.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect(),
            None => {
                tracing::warn!("pacman -Qq failed; treating installed package list as empty");
                BTreeSet::new()
            }
        }
    }

    fn lspci_machine(&self) -> String {
        capture("lspci", &["-mm"]).unwrap_or_default()
    }

    fn lspci_kernel(&self) -> String {
        capture("lspci", &["-k"]).unwrap_or_default()
    }

    fn nvidia_gpu_names(&self) -> Option<String> {
        capture("nvidia-smi", &["--query-gpu=name", "--format=csv,noheader"])
    }

    fn nvidia_query(&self) -> Option<String> {
        capture("nvidia-smi", &["-q"])
    }

    fn kernel_module_marker(&self) -> Option<String> {
        fs::read_to_string(&self.marker_path).ok()
    }

    fn command_exists(&self, command: &str) -> bool {
        Command::new("which")
            .arg(command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// --- Canned implementation ---

/// Probe that answers from fixed data. Used by tests and for replaying
/// captured `lspci` / `nvidia-smi` output offline.
#[derive(Debug, Clone, Default)]
pub struct CannedSystem {
    pub packages: BTreeSet<String>,
    pub lspci_mm: String,
    pub lspci_k: String,
    pub gpu_names: Option<String>,
    pub smi_query: Option<String>,
    pub marker: Option<String>,
    pub commands: BTreeSet<String>,
    /// Program name -> canned result for [`SystemProbe::run`].
    pub run_results: BTreeMap<String, CommandOutput>,
}

impl CannedSystem {
    pub fn with_packages(mut self, packages: &[&str]) -> Self {
        self.packages.extend(packages.iter().map(|p| p.to_string()));
        self
    }

    pub fn with_commands(mut self, commands: &[&str]) -> Self {
        self.commands.extend(commands.iter().map(|c| c.to_string()));
        self
    }
}

impl SystemProbe for CannedSystem {
    fn is_installed(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    fn installed_packages(&self) -> BTreeSet<String> {
        self.packages.clone()
    }

    fn lspci_machine(&self) -> String {
        self.lspci_mm.clone()
    }

    fn lspci_kernel(&self) -> String {
        self.lspci_k.clone()
    }

    fn nvidia_gpu_names(&self) -> Option<String> {
        self.gpu_names.clone()
    }

    fn nvidia_query(&self) -> Option<String> {
        self.smi_query.clone()
    }

    fn kernel_module_marker(&self) -> Option<String> {
        self.marker.clone()
    }

    fn command_exists(&self, command: &str) -> bool {
        self.commands.contains(command)
    }

    fn run(&self, program: &str, _args: &[&str]) -> io::Result<CommandOutput> {
        self.run_results
            .get(program)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{program} not found")))
    }
}
