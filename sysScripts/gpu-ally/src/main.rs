//! GPU Ally
//!
//! Inspects the GPUs in this machine, then builds and (optionally) runs a
//! driver installation plan for the chosen workloads.
//!
//! Usage:
//!   gpu-ally                      interactive wizard
//!   gpu-ally inspect [--json]     hardware, drivers and GSP state
//!   gpu-ally plan --gaming --ai   print the plan, `--run` to execute it

use std::path::PathBuf;
use std::process::{Command, ExitCode};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use inquire::{Confirm, MultiSelect, Select};

use gpu_ally::plan::{self, Workloads};
use gpu_ally::report::SystemReport;
use gpu_ally::sequence;
use gpu_ally::{DriverType, Inspection, InstallationPlan, PlanEnv, Session, Vendor, Workload};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Alternate config file (defaults to ~/.config/rust-dotfiles/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Show detected GPUs, driver packages and GSP status
    Inspect {
        #[arg(long)]
        json: bool,
    },
    /// Build an installation plan
    Plan {
        #[arg(long, value_enum, default_value_t = VendorArg::Auto)]
        vendor: VendorArg,
        #[arg(long)]
        gaming: bool,
        #[arg(long)]
        ai: bool,
        #[arg(long, value_enum, default_value_t = DriverType::Proprietary)]
        driver: DriverType,
        #[arg(long, conflicts_with = "run")]
        json: bool,
        /// Execute the plan after confirmation
        #[arg(long)]
        run: bool,
        /// Skip the confirmation prompt
        #[arg(short, long, requires = "run")]
        yes: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VendorArg {
    Auto,
    Nvidia,
    Amd,
    Intel,
}

impl VendorArg {
    fn resolve(self, inspection: &Inspection) -> Vendor {
        match self {
            VendorArg::Auto => inspection.primary_vendor(),
            VendorArg::Nvidia => Vendor::Nvidia,
            VendorArg::Amd => Vendor::Amd,
            VendorArg::Intel => Vendor::Intel,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    gpu_ally::init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "❌".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let session = Session::load(cli.config.as_deref())?;

    match cli.command {
        Some(Cmd::Inspect { json }) => {
            let report = SystemReport::collect(&session);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(Cmd::Plan { vendor, gaming, ai, driver, json, run, yes }) => {
            let inspection = gpu_ally::inspect(session.probe());
            let mut workloads = Workloads::new();
            if gaming {
                workloads.insert(Workload::Gaming);
            }
            if ai {
                workloads.insert(Workload::Ai);
            }
            let env = PlanEnv::detect(&session.config, session.probe());
            let plan = gpu_ally::build_plan(vendor.resolve(&inspection), &workloads, driver, &env);

            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
                return Ok(ExitCode::SUCCESS);
            }
            let steps = sequence::linearize(&plan, &sequence::invoking_user());
            print_plan(&plan, &steps);
            if run { execute(&session, &plan, &steps, yes) } else { Ok(ExitCode::SUCCESS) }
        }
        None => wizard(&session),
    }
}

// --- Interactive wizard ---

fn wizard(session: &Session) -> Result<ExitCode> {
    println!("{}", "🔍 Detecting GPU Hardware...".blue().bold());
    let inspection = gpu_ally::inspect(session.probe());
    print_devices(&inspection);

    let vendors = [Vendor::Nvidia, Vendor::Amd, Vendor::Intel];
    let detected = inspection.primary_vendor();
    let start = vendors.iter().position(|v| *v == detected).unwrap_or(0);
    let vendor = Select::new("Which GPU should drivers be installed for?", vendors.to_vec())
        .with_starting_cursor(start)
        .prompt()
        .context("Cancelled")?;

    let picked = MultiSelect::new("Workloads:", vec![Workload::Gaming, Workload::Ai])
        .prompt()
        .context("Cancelled")?;
    let workloads: Workloads = picked.into_iter().collect();

    let driver = if vendor == Vendor::Nvidia {
        Select::new(
            "Nvidia driver type:",
            vec![DriverType::Proprietary, DriverType::Open, DriverType::Beta],
        )
        .prompt()
        .context("Cancelled")?
    } else {
        DriverType::Open
    };

    let env = PlanEnv::detect(&session.config, session.probe());
    let plan = gpu_ally::build_plan(vendor, &workloads, driver, &env);
    let steps = sequence::linearize(&plan, &sequence::invoking_user());
    print_plan(&plan, &steps);
    execute(session, &plan, &steps, false)
}

// --- Execution ---

/// Runs the reviewed steps. `steps` must be exactly what [`print_plan`] showed.
fn execute(
    session: &Session,
    plan: &InstallationPlan,
    steps: &[String],
    assume_yes: bool,
) -> Result<ExitCode> {
    if steps.is_empty() {
        println!("{}", "Nothing to run.".yellow());
        return Ok(ExitCode::SUCCESS);
    }
    if plan.installs_nothing() {
        println!("{}", "No packages to install; only group membership and services will be applied.".yellow());
    }
    let command = sequence::chain(steps);

    if !assume_yes {
        let proceed = Confirm::new("Run these commands now?")
            .with_default(false)
            .prompt()
            .unwrap_or(false);
        if !proceed {
            println!("No changes made.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    tracing::debug!(%command, "running install chain");
    let status = Command::new("bash")
        .arg("-c")
        .arg(&command)
        .status()
        .context("Failed to start bash")?;
    if !status.success() {
        bail!("Installation stopped at a failing step (exit {:?})", status.code());
    }

    println!("\n{}", "✅ Installation finished. Re-checking hardware...".green().bold());
    print_devices(&gpu_ally::inspect(session.probe()));
    println!("{}", "A reboot is recommended to load new kernel modules.".yellow());
    Ok(ExitCode::SUCCESS)
}

// --- Output ---

fn print_devices(inspection: &Inspection) {
    if inspection.devices.is_empty() {
        println!("   ⚠️  No display devices detected.");
        return;
    }
    for dev in &inspection.devices {
        println!(
            "   👉 [{}] {} {} ({})",
            dev.slot,
            dev.vendor.to_string().bold(),
            dev.model,
            dev.variant_label().cyan()
        );
        if let Some(driver) = &dev.active_driver {
            println!("      driver in use: {driver}");
        }
    }
    if !inspection.installed_packages.is_empty() {
        let pkgs: Vec<&str> = inspection.installed_packages.iter().map(String::as_str).collect();
        println!("   📦 {}", pkgs.join(", "));
    }
}

fn print_report(report: &SystemReport) {
    println!("{}", "GPUs".blue().bold());
    print_devices(&Inspection {
        devices: report.devices.clone(),
        installed_packages: report.installed_packages.iter().cloned().collect(),
    });

    println!("\n{}", "GSP Firmware".blue().bold());
    let compat = if report.compatibility.is_compatible() {
        report.compatibility.code().green()
    } else {
        report.compatibility.code().red()
    };
    println!("   compatibility:  {compat}");
    match (report.bootloader, report.gsp_disabled_in_config) {
        (Some(kind), Some(disabled)) => {
            println!("   bootloader:     {kind}");
            println!("   boot config:    {}", if disabled { "DISABLED" } else { "ENABLED" });
        }
        (Some(kind), None) => {
            println!("   bootloader:     {kind}");
            println!("   boot config:    {}", "unreadable".red());
        }
        (None, _) => println!("   bootloader:     {}", "not detected".yellow()),
    }
    println!("   runtime:        {}", report.gsp_runtime);
}

fn print_plan(plan: &InstallationPlan, steps: &[String]) {
    println!("\n{} {}", "📋 Plan for".blue().bold(), plan.vendor.to_string().bold());
    if let Some(helper) = &plan.nvidia_helper {
        println!("   helper:   {}", helper.command());
    }
    if !plan.packages.is_empty() {
        println!("   pacman:   {}", plan.packages.join(" "));
    }
    if !plan.aur_packages.is_empty() {
        let helper = plan.aur_helper.as_deref().unwrap_or("(none found)");
        println!("   aur:      {} via {helper}", plan.aur_packages.join(" "));
    }
    if !plan.groups.is_empty() {
        println!("   groups:   {}", plan.groups.join(", "));
    }
    if !plan.services.is_empty() {
        println!("   services: {}", plan.services.join(", "));
    }
    if plan.post_install.contains(&plan::PostInstall::RegenerateInitramfs) {
        println!("   then:     regenerate initramfs");
    }
    for warning in &plan.warnings {
        println!("   {} {}", "⚠️ ".yellow(), warning.yellow());
    }
    println!("\n{}", "Commands, in order (the first failure stops the rest):".blue().bold());
    print!("{}", sequence::review(steps));
}
