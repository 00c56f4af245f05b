//! Command sequencer.
//!
//! Linearizes an [`InstallationPlan`] into shell steps in a fixed order and
//! chains them so the first failure stops everything after it.

use std::env;

use crate::plan::{
    BETA_NVIDIA_PACKAGES, InstallationPlan, NVIDIA_HELPER, NvidiaFamily, PostInstall,
    STANDARD_NVIDIA_PACKAGES,
};

pub const STEP_SEPARATOR: &str = " && ";

/// `SUDO_USER`, then `USER`, then `root`.
pub fn invoking_user() -> String {
    env::var("SUDO_USER")
        .ok()
        .filter(|u| !u.is_empty())
        .or_else(|| env::var("USER").ok().filter(|u| !u.is_empty()))
        .unwrap_or_else(|| "root".to_string())
}

/// Removes whichever of `packages` are installed, ignoring dependents.
/// A no-op when none are installed.
pub fn guarded_removal(packages: &[&str]) -> String {
    format!(
        "(pkgs_to_remove=$(pacman -Qq {} 2>/dev/null || true); \
         if [ -n \"$pkgs_to_remove\" ]; then sudo pacman -Rdd --noconfirm $pkgs_to_remove; fi)",
        packages.join(" ")
    )
}

/// Rebuilds initramfs with mkinitcpio or dracut, whichever exists.
pub fn initramfs_step() -> String {
    "(if command -v mkinitcpio >/dev/null; then sudo mkinitcpio -P; \
     elif command -v dracut >/dev/null; then sudo dracut --regenerate-all --force; \
     else echo \"No initramfs generator found (mkinitcpio or dracut); skipping\"; fi)"
        .to_string()
}

fn helper_bootstrap() -> String {
    format!("(pacman -Qi {NVIDIA_HELPER} &>/dev/null || sudo pacman -S --noconfirm {NVIDIA_HELPER})")
}

fn missing_aur_helper(packages: &[String]) -> String {
    format!(
        "(echo \"No AUR helper (paru or yay) found; cannot install: {}\" >&2; exit 1)",
        packages.join(" ")
    )
}

/// Ordered steps:
/// 0. abort if AUR packages are planned but no helper exists
/// 1. group membership
/// 2. clear the conflicting Nvidia family
/// 3. distro helper (bootstrapped first)
/// 4. repo packages
/// 5. AUR packages
/// 6. post-install actions
/// 7. services
pub fn linearize(plan: &InstallationPlan, user: &str) -> Vec<String> {
    let mut steps = Vec::new();

    // Nothing may be removed when the AUR step is bound to fail
    if !plan.aur_packages.is_empty() && plan.aur_helper.is_none() {
        tracing::warn!("no AUR helper available; chain will stop before any change");
        steps.push(missing_aur_helper(&plan.aur_packages));
        return steps;
    }

    for group in &plan.groups {
        steps.push(format!("sudo usermod -aG {group} {user}"));
    }

    match plan.nvidia_family {
        Some(NvidiaFamily::Standard) => steps.push(guarded_removal(BETA_NVIDIA_PACKAGES)),
        Some(NvidiaFamily::Beta) => steps.push(guarded_removal(STANDARD_NVIDIA_PACKAGES)),
        None => {}
    }

    if let Some(helper) = &plan.nvidia_helper {
        steps.push(helper_bootstrap());
        steps.push(format!("sudo {}", helper.command()));
    }

    if !plan.packages.is_empty() {
        steps.push(format!("sudo pacman -S --noconfirm --needed {}", plan.packages.join(" ")));
    }

    if let Some(helper) = plan.aur_helper.as_deref().filter(|_| !plan.aur_packages.is_empty()) {
        // Repo packages above may have pulled the standard utils back in
        if plan.nvidia_family == Some(NvidiaFamily::Beta) && !plan.packages.is_empty() {
            steps.push(guarded_removal(STANDARD_NVIDIA_PACKAGES));
        }
        steps.push(format!("{helper} -S --noconfirm --needed {}", plan.aur_packages.join(" ")));
    }

    for action in &plan.post_install {
        steps.push(match action {
            PostInstall::RegenerateInitramfs => initramfs_step(),
            PostInstall::Shell(cmd) => cmd.clone(),
        });
    }

    for service in &plan.services {
        steps.push(format!("sudo systemctl enable --now {service}"));
    }

    steps
}

/// Numbered listing of `steps` for the plan review, one command per line.
pub fn review(steps: &[String]) -> String {
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{:>3}. {step}\n", i + 1))
        .collect()
}

/// Joins steps with `&&`. Empty input gives an empty string.
pub fn chain(steps: &[String]) -> String {
    steps.join(STEP_SEPARATOR)
}
