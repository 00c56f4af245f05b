use std::fs;
use std::path::Path;

use gpu_ally::boot::{Bootloader, BootloaderKind, Outcome};
use gpu_ally::gsp::{self, GspError};
use gpu_ally::system::{CannedSystem, CommandOutput};
use gpu_ally::{CompatibilityStatus, Config, GSP_PARAM};
use tempfile::TempDir;

fn config_in(dir: &Path) -> Config {
    Config {
        grub_default: dir.join("grub"),
        grub_cfg: dir.join("grub.cfg"),
        eos_cmdline: dir.join("cmdline"),
        loader_entries: dir.join("entries"),
        ..Config::default()
    }
}

fn closed_driver() -> CannedSystem {
    CannedSystem {
        gpu_names: Some("NVIDIA GeForce RTX 4080\n".into()),
        ..Default::default()
    }
    .with_packages(&["nvidia-dkms", "nvidia-utils"])
}

fn ok_output() -> CommandOutput {
    CommandOutput { success: true, stdout: "done\n".into(), stderr: String::new() }
}

fn entries_dir(tmp: &TempDir) -> std::path::PathBuf {
    let dir = tmp.path().join("entries");
    fs::create_dir(&dir).unwrap();
    dir
}

// --- Detection ---

#[test]
fn eos_cmdline_wins_over_everything() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(tmp.path());
    fs::write(&config.eos_cmdline, "quiet\n").unwrap();
    fs::write(&config.grub_default, "GRUB_CMDLINE_LINUX_DEFAULT=\"quiet\"\n").unwrap();
    fs::write(entries_dir(&tmp).join("arch.conf"), "options root=/dev/sda2\n").unwrap();

    let boot = Bootloader::detect(&config, &CannedSystem::default()).unwrap();
    assert_eq!(boot.kind, BootloaderKind::SystemdBootEos);
}

#[test]
fn manual_entries_need_helper_absent() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(tmp.path());
    fs::write(entries_dir(&tmp).join("arch.conf"), "options root=/dev/sda2\n").unwrap();
    fs::write(&config.grub_default, "GRUB_CMDLINE_LINUX_DEFAULT=\"quiet\"\n").unwrap();

    let boot = Bootloader::detect(&config, &CannedSystem::default()).unwrap();
    assert_eq!(boot.kind, BootloaderKind::SystemdBootManual);

    let with_helper = CannedSystem::default().with_commands(&["reinstall-kernels"]);
    let boot = Bootloader::detect(&config, &with_helper).unwrap();
    assert_eq!(boot.kind, BootloaderKind::Grub);
}

#[test]
fn empty_entries_dir_is_not_systemd_boot() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(tmp.path());
    entries_dir(&tmp);
    assert!(Bootloader::detect(&config, &CannedSystem::default()).is_none());
}

// --- Toggle round trips ---

#[test]
fn grub_round_trip_restores_normalized_line() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(tmp.path());
    let original = "GRUB_DEFAULT=0\nGRUB_CMDLINE_LINUX_DEFAULT=\"loglevel=3 quiet\"\nGRUB_CMDLINE_LINUX=\"\"\n";
    fs::write(&config.grub_default, original).unwrap();
    let boot = Bootloader::new(BootloaderKind::Grub, &config);

    boot.toggle(true).unwrap();
    let disabled = fs::read_to_string(&config.grub_default).unwrap();
    assert!(disabled.contains(&format!("GRUB_CMDLINE_LINUX_DEFAULT=\"loglevel=3 quiet {GSP_PARAM}\"")));
    assert!(boot.is_parameter_present().unwrap());

    boot.toggle(false).unwrap();
    assert_eq!(fs::read_to_string(&config.grub_default).unwrap(), original);
    assert!(!boot.is_parameter_present().unwrap());
}

#[test]
fn cmdline_toggle_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(tmp.path());
    fs::write(&config.eos_cmdline, "nvme_load=YES rw quiet\n").unwrap();
    let boot = Bootloader::new(BootloaderKind::SystemdBootEos, &config);

    let first = boot.toggle(true).unwrap();
    assert_eq!(first.changed(), 1);
    let once = fs::read_to_string(&config.eos_cmdline).unwrap();
    let second = boot.toggle(true).unwrap();
    assert_eq!(second.changed(), 0);
    assert!(matches!(second.files[0].1, Ok(Outcome::Unchanged)));
    assert_eq!(fs::read_to_string(&config.eos_cmdline).unwrap(), once);
    assert_eq!(once.matches(GSP_PARAM).count(), 1);

    boot.toggle(false).unwrap();
    assert_eq!(fs::read_to_string(&config.eos_cmdline).unwrap(), "nvme_load=YES rw quiet\n");
}

#[test]
fn grub_disable_twice_matches_disable_once() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(tmp.path());
    fs::write(&config.grub_default, "GRUB_TIMEOUT=5\nGRUB_CMDLINE_LINUX_DEFAULT=\"quiet splash\"  # tuned\n").unwrap();
    let boot = Bootloader::new(BootloaderKind::Grub, &config);

    assert_eq!(boot.toggle(true).unwrap().changed(), 1);
    let once = fs::read_to_string(&config.grub_default).unwrap();
    let second = boot.toggle(true).unwrap();
    assert!(matches!(second.files[0].1, Ok(Outcome::Unchanged)));
    assert_eq!(fs::read_to_string(&config.grub_default).unwrap(), once);
    assert_eq!(once.matches(GSP_PARAM).count(), 1);
    assert!(once.ends_with("\"  # tuned\n"));
}

#[test]
fn manual_entries_disable_twice_match_disable_once() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(tmp.path());
    let dir = entries_dir(&tmp);
    fs::write(dir.join("arch.conf"), "title Arch\noptions root=UUID=abc rw\n").unwrap();
    fs::write(dir.join("fallback.conf"), format!("title Fallback\noptions root=UUID=abc {GSP_PARAM}\n")).unwrap();
    let boot = Bootloader::new(BootloaderKind::SystemdBootManual, &config);

    assert_eq!(boot.toggle(true).unwrap().changed(), 1);
    let once: Vec<String> = boot.target_files().iter().map(|p| fs::read_to_string(p).unwrap()).collect();
    let second = boot.toggle(true).unwrap();
    assert_eq!(second.changed(), 0);
    let twice: Vec<String> = boot.target_files().iter().map(|p| fs::read_to_string(p).unwrap()).collect();
    assert_eq!(once, twice);
    assert!(twice.iter().all(|c| c.matches(GSP_PARAM).count() == 1));
}

#[test]
fn enable_on_clean_files_changes_nothing() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(tmp.path());
    let grub = "GRUB_CMDLINE_LINUX_DEFAULT='quiet'\n";
    fs::write(&config.grub_default, grub).unwrap();
    let report = Bootloader::new(BootloaderKind::Grub, &config).toggle(false).unwrap();
    assert!(report.succeeded());
    assert_eq!(fs::read_to_string(&config.grub_default).unwrap(), grub);
}

#[test]
fn grub_without_cmdline_key_fails_on_disable() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(tmp.path());
    fs::write(&config.grub_default, "GRUB_TIMEOUT=5\n").unwrap();
    let report = Bootloader::new(BootloaderKind::Grub, &config).toggle(true).unwrap();
    assert!(!report.succeeded());
    assert_eq!(fs::read_to_string(&config.grub_default).unwrap(), "GRUB_TIMEOUT=5\n");
}

#[test]
fn manual_entries_are_toggled_per_file() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(tmp.path());
    let dir = entries_dir(&tmp);
    let with_param = format!("title Arch\nlinux /vmlinuz-linux\noptions root=UUID=abc rw {GSP_PARAM} quiet\n");
    let without = "title Arch LTS\nlinux /vmlinuz-linux-lts\noptions root=UUID=abc rw\n";
    fs::write(dir.join("arch.conf"), &with_param).unwrap();
    fs::write(dir.join("arch-lts.conf"), without).unwrap();
    fs::write(dir.join("notes.txt"), GSP_PARAM).unwrap();

    let boot = Bootloader::new(BootloaderKind::SystemdBootManual, &config);
    assert!(boot.is_parameter_present().unwrap());

    let report = boot.toggle(false).unwrap();
    assert_eq!(report.files.len(), 2);
    assert_eq!(report.changed(), 1);
    assert_eq!(
        fs::read_to_string(dir.join("arch.conf")).unwrap(),
        "title Arch\nlinux /vmlinuz-linux\noptions root=UUID=abc rw quiet\n"
    );
    assert_eq!(fs::read_to_string(dir.join("arch-lts.conf")).unwrap(), without);
    assert_eq!(fs::read_to_string(dir.join("notes.txt")).unwrap(), GSP_PARAM);
    assert!(!boot.is_parameter_present().unwrap());
}

#[test]
fn manual_toggle_without_entries_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(tmp.path());
    entries_dir(&tmp);
    assert!(Bootloader::new(BootloaderKind::SystemdBootManual, &config).toggle(true).is_err());
}

// --- Gated switch ---

#[test]
fn full_switch_on_grub() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(tmp.path());
    fs::write(&config.grub_default, "GRUB_CMDLINE_LINUX_DEFAULT=\"quiet\"\n").unwrap();
    let mut probe = closed_driver().with_commands(&["grub-mkconfig"]);
    probe.run_results.insert("grub-mkconfig".into(), ok_output());

    let boot = gsp::prepare(&config, &probe).unwrap();
    let applied = gsp::apply(&boot, &probe, true, true).unwrap();
    assert_eq!(applied.regeneration_output, "done\n");
    assert_eq!(gsp::state_label(boot.is_parameter_present().unwrap()), "DISABLED");

    gsp::apply(&boot, &probe, false, true).unwrap();
    assert_eq!(gsp::state_label(boot.is_parameter_present().unwrap()), "ENABLED");
}

#[test]
fn open_kernel_is_refused_before_any_write() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(tmp.path());
    fs::write(&config.eos_cmdline, "quiet\n").unwrap();
    let probe = CannedSystem {
        gpu_names: Some("NVIDIA GeForce RTX 4080\n".into()),
        ..Default::default()
    }
    .with_packages(&["nvidia-open-dkms"]);

    match gsp::prepare(&config, &probe) {
        Err(GspError::Incompatible(status)) => {
            assert_eq!(status, CompatibilityStatus::IncompatibleOpenKernel);
            assert_eq!(status.to_string(), "INCOMPATIBLE_OPEN");
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(fs::read_to_string(&config.eos_cmdline).unwrap(), "quiet\n");
}

#[test]
fn manual_switch_needs_no_regeneration_tool() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(tmp.path());
    fs::write(entries_dir(&tmp).join("arch.conf"), "options root=/dev/sda2 rw\n").unwrap();
    let probe = closed_driver();

    let boot = gsp::prepare(&config, &probe).unwrap();
    assert_eq!(boot.kind, BootloaderKind::SystemdBootManual);
    let applied = gsp::apply(&boot, &probe, true, true).unwrap();
    assert_eq!(applied.report.changed(), 1);
    assert!(boot.is_parameter_present().unwrap());
}
