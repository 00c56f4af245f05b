//! Nvidia GSP Firmware Manager (gsp-manager)
//!
//! Adds or removes `nvidia.NVreg_EnableGpuFirmware=0` on the kernel command
//! line. Script-friendly flags, or an interactive prompt when run bare.
//!
//! Usage:
//!   gsp-manager --check     prints ENABLED / DISABLED (or an INCOMPATIBLE_* code)
//!   gsp-manager --disable   apply the fix (root)
//!   gsp-manager --enable    revert to stock (root)

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgGroup, Parser};
use colored::*;
use inquire::Confirm;

use gpu_ally::gsp::{self, Applied, GspError};
use gpu_ally::report;
use gpu_ally::{Bootloader, CompatibilityStatus, Session};

const VERIFY_HINT: &str = "To verify the fix after reboot, run:\n  nvidia-smi -q | grep GSP";

#[derive(Debug, Parser)]
#[command(author, version, about = "Nvidia GSP Firmware Manager", long_about = None)]
#[command(group(ArgGroup::new("mode").args(["check", "enable", "disable"])))]
struct Args {
    /// Print ENABLED or DISABLED and exit
    #[arg(long)]
    check: bool,
    /// Enable GSP (revert to stock)
    #[arg(long)]
    enable: bool,
    /// Disable GSP (apply fix)
    #[arg(long)]
    disable: bool,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn main() -> ExitCode {
    let args = Args::parse();
    gpu_ally::init_tracing(args.verbose);

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            println!("ERROR: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode> {
    let session = Session::load(args.config.as_deref())?;
    let boot = match gsp::prepare(&session.config, session.probe()) {
        Ok(boot) => boot,
        Err(GspError::Incompatible(status)) if args.check => {
            println!("{status}");
            return Ok(ExitCode::SUCCESS);
        }
        Err(GspError::Incompatible(status)) => {
            print_incompatible(status);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => {
            println!("ERROR: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    if args.check {
        return Ok(match gsp::configured_disabled(&boot) {
            Ok(disabled) => {
                println!("{}", gsp::state_label(disabled));
                ExitCode::SUCCESS
            }
            Err(e) => {
                println!("ERROR: {e}");
                ExitCode::FAILURE
            }
        });
    }
    if args.enable || args.disable {
        return Ok(switch(&session, &boot, args.disable));
    }
    interactive(&session, &boot)
}

// --- Flag mode ---

fn switch(session: &Session, boot: &Bootloader, disable: bool) -> ExitCode {
    let verb = if disable { "disable" } else { "enable" };
    match gsp::apply(boot, session.probe(), disable, is_root()) {
        Ok(applied) => {
            print_applied(&applied, disable);
            ExitCode::SUCCESS
        }
        Err(e) => {
            if let Some(report) = e.report() {
                for (path, err) in report.failures() {
                    println!("  {}: {err}", path.display());
                }
            }
            match &e {
                GspError::ToggleFailed(_) | GspError::Boot(_) => {
                    println!("ERROR: Failed to {verb} GSP. {e}");
                }
                GspError::Regeneration { source, .. } => {
                    println!("WARNING: {e}");
                    println!("  {source}");
                }
                _ => println!("ERROR: {e}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn print_applied(applied: &Applied, disable: bool) {
    let out = applied.regeneration_output.trim();
    if !out.is_empty() {
        println!("{out}");
    }
    if disable {
        println!("SUCCESS: GSP Disabled (Fix Applied). Reboot required.");
    } else {
        println!("SUCCESS: GSP Enabled (Default). Reboot required.");
    }
    println!("\n{VERIFY_HINT}");
}

fn print_incompatible(status: CompatibilityStatus) {
    println!("ERROR: Compatibility check failed ({status}).");
    for line in status.reason() {
        println!("  {line}");
    }
    println!("Aborting operation.");
}

// --- Interactive mode ---

fn interactive(session: &Session, boot: &Bootloader) -> Result<ExitCode> {
    let disabled = match gsp::configured_disabled(boot) {
        Ok(disabled) => disabled,
        Err(e) => {
            println!("{} {e}", "ERROR:".red());
            return Ok(ExitCode::FAILURE);
        }
    };
    println!("{} {}", "Detected bootloader:".blue(), boot.kind.to_string().bold());
    println!(
        "{} {}",
        "Configured GSP firmware:".blue(),
        if disabled { "Disabled (Fix Applied)".green() } else { "Enabled (Default)".yellow() }
    );
    println!("{} {}", "Running driver reports:".blue(), report::gsp_runtime(session.probe()));
    println!("\nTo fix stuttering on some Pascal/Turing+ cards, GSP should be DISABLED.");

    let prompt = if disabled {
        "Do you want to ENABLE it (revert to stock)?"
    } else {
        "Do you want to DISABLE it (apply fix)?"
    };
    let confirmed = match Confirm::new(prompt).with_default(false).prompt() {
        Ok(answer) => answer,
        Err(_) => {
            println!("Cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    };
    if !confirmed {
        println!("No changes made.");
        return Ok(ExitCode::SUCCESS);
    }
    if !is_root() {
        println!("{}", "This requires root privileges to modify boot config. Please run with sudo.".red());
        return Ok(ExitCode::FAILURE);
    }
    Ok(switch(session, boot, !disabled))
}
