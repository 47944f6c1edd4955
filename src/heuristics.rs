//! Path-based modifier heuristics, grounded verbatim in `heuristics.c`.
//!
//! Each file record is independently checked against three rule sets marking
//! it config, state, or boot content. These are cheap prefix/equality checks
//! over the path, not a general rule engine — the original's own comment
//! calls out that a regex-driven rewrite is future work, and this crate
//! keeps the same shape rather than inventing one.

use crate::model::Manifest;

const EXACT_NON_STATE_DIRS: &[&str] = &[
    "/usr/src/debug",
    "/usr/src/kernel",
    "/dev",
    "/home",
    "/proc",
    "/root",
    "/run",
    "/sys",
    "/var",
];

const KERNEL_SRC_PREFIX: &str = "/usr/src/kernel/";

const STATE_PREFIXES: &[&str] = &[
    "/dev/",
    "/home/",
    "/proc/",
    "/root/",
    "/run/",
    "/sys/",
    "/tmp/",
    "/var/",
    "/usr/src/",
];

const SURPRISING_STATE_PREFIXES: &[&str] = &[
    "/acct",
    "/cache",
    "/data",
    "/lost+found",
    "/mnt/asec",
    "/mnt/obb",
    "/mnt/shell/emulated",
    "/mnt/swupd",
    "/oem",
    "/system/rt/audio",
    "/system/rt/gfx",
    "/system/rt/media",
    "/system/rt/wifi",
    "/system/etc/firmware/virtual",
];

const BOOT_PREFIXES: &[&str] = &[
    "/boot/",
    "/usr/lib/modules/",
    "/usr/lib/kernel/",
    "/usr/share/kernel/",
    "/usr/lib/gummiboot",
    "/usr/bin/gummiboot",
];

fn config_file_heuristic(path: &str) -> bool {
    path.starts_with("/etc/")
}

fn runtime_state_heuristic(path: &str) -> bool {
    if EXACT_NON_STATE_DIRS.contains(&path) || path == "/tmp" {
        return false;
    }
    if path.starts_with(KERNEL_SRC_PREFIX) {
        return false;
    }
    STATE_PREFIXES.iter().any(|p| path.starts_with(p))
        || SURPRISING_STATE_PREFIXES.iter().any(|p| path.starts_with(p))
}

fn boot_file_heuristic(path: &str) -> bool {
    BOOT_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Applies the three heuristics to every record in `manifest`, in place.
pub fn apply_heuristics(manifest: &mut Manifest) {
    for file in manifest.files.iter_mut() {
        if config_file_heuristic(&file.path) {
            file.modifiers.is_config = true;
            log::debug!("config file marked: {}", file.path);
        }
        if runtime_state_heuristic(&file.path) {
            file.modifiers.is_state = true;
            log::debug!("runtime state detected: {}", file.path);
        }
        if boot_file_heuristic(&file.path) {
            file.modifiers.is_boot = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileKind, FileRecord};

    #[test]
    fn marks_etc_as_config() {
        let mut m = Manifest::new("os-core", 10, 1);
        m.files.push(FileRecord::new("/etc/passwd", FileKind::Regular, 10));
        apply_heuristics(&mut m);
        assert!(m.files[0].modifiers.is_config);
    }

    #[test]
    fn does_not_mark_var_itself_as_state() {
        let mut m = Manifest::new("os-core", 10, 1);
        m.files.push(FileRecord::new("/var", FileKind::Directory, 10));
        m.files.push(FileRecord::new("/var/log", FileKind::Directory, 10));
        apply_heuristics(&mut m);
        assert!(!m.files[0].modifiers.is_state);
        assert!(m.files[1].modifiers.is_state);
    }

    #[test]
    fn marks_boot_paths() {
        let mut m = Manifest::new("os-core", 10, 1);
        m.files.push(FileRecord::new("/boot/vmlinuz", FileKind::Regular, 10));
        apply_heuristics(&mut m);
        assert!(m.files[0].modifiers.is_boot);
    }
}
