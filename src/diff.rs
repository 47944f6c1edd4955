//! Pairing / diff engine (component D).
//!
//! Grounded in `manifest.c`'s lockstep pairing walk (the function historically
//! named `link_manifests`/`compute_versions` in the original tree). Two
//! sorted-by-path manifests are walked together; paths are classified as
//! same/changed/deleted/new, `last_change` is propagated for unchanged rows,
//! and deletions are synthesized into the newer manifest so every path in
//! `m1 ∪ m2` ends up represented exactly once in `m2`.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::model::{FileStatus, Manifest};
use crate::stats::BuildStats;

/// Number of observed changes (new + deleted + content-changed).
pub struct DiffReport {
    pub new_files: usize,
    pub deleted_files: usize,
    pub changed_files: usize,
}

impl DiffReport {
    pub fn total(&self) -> usize {
        self.new_files + self.deleted_files + self.changed_files
    }
}

fn same_content(a: &crate::model::FileRecord, b: &crate::model::FileRecord) -> bool {
    a.kind == b.kind
        && a.status == b.status
        && a.digest == b.digest
        && a.modifiers == b.modifiers
}

/// Diffs `old` against `new` in place, synthesizing deletions into `new` and
/// updating `last_change`/`peer` on both sides. `minversion` is the floor
/// below which an unchanged row is still treated as changed (used when a
/// build wants to force everything older than some version to be re-stamped).
///
/// A path present on both sides whose `kind` differs (a regular file turned
/// into a directory, a symlink replacing a fullfile, and so on) is a fatal
/// build invariant violation rather than an ordinary content change: there is
/// no delta format spanning two file types, so the pair is rejected outright.
pub fn diff(old: &mut Manifest, new: &mut Manifest, minversion: u32, stats: &BuildStats) -> Result<DiffReport> {
    let mut report = DiffReport {
        new_files: 0,
        deleted_files: 0,
        changed_files: 0,
    };

    let mut i = 0usize;
    let mut j = 0usize;
    let mut synthesized = Vec::new();
    let mut drop_new: Vec<usize> = Vec::new();

    // Clear any stale peer links before a fresh pairing pass.
    for f in old.files.iter_mut() {
        f.peer = None;
    }
    for f in new.files.iter_mut() {
        f.peer = None;
    }

    while i < old.files.len() && j < new.files.len() {
        use std::cmp::Ordering;
        match old.files[i].path.cmp(&new.files[j].path) {
            Ordering::Equal => {
                let format_bump_amnesty = old.format < new.format
                    && old.files[i].is_deleted()
                    && new.files[j].is_deleted();
                if format_bump_amnesty {
                    drop_new.push(j);
                    i += 1;
                    j += 1;
                    continue;
                }

                let old_present = !old.files[i].is_deleted();
                let new_present = !new.files[j].is_deleted();
                if old_present && new_present && old.files[i].kind != new.files[j].kind {
                    return Err(Error::TypeChange {
                        path: PathBuf::from(&old.files[i].path),
                        old_kind: old.files[i].kind.type_char(),
                        new_kind: new.files[j].kind.type_char(),
                        old_version: old.files[i].last_change,
                        new_version: new.version,
                    });
                }

                if old_present {
                    old.files[i].peer = Some(j);
                    new.files[j].peer = Some(i);
                }

                if same_content(&old.files[i], &new.files[j]) && old.files[i].last_change >= minversion {
                    new.files[j].last_change = old.files[i].last_change;
                    new.files[j].is_rename = old.files[i].is_rename;
                } else {
                    if new.files[j].status == FileStatus::Deleted && old.files[i].status == FileStatus::Deleted {
                        // both deleted, nothing new happened
                    } else if new.files[j].status == FileStatus::Deleted {
                        report.deleted_files += 1;
                        stats.account_deleted_file();
                    } else {
                        report.changed_files += 1;
                        stats.account_changed_file();
                    }
                }
                i += 1;
                j += 1;
            }
            Ordering::Less => {
                // Present in old, absent from new: synthesize a deletion.
                let mut deleted = old.files[i].clone();
                deleted.digest = crate::model::zero_hash();
                let was_already_deleted = deleted.is_deleted();
                if deleted.modifiers.is_boot {
                    deleted.status = FileStatus::Ghosted;
                } else {
                    deleted.status = FileStatus::Deleted;
                }
                if !was_already_deleted {
                    deleted.last_change = new.version;
                    deleted.is_rename = false;
                    report.deleted_files += 1;
                    stats.account_deleted_file();
                }
                deleted.peer = Some(i);
                synthesized.push(deleted);
                i += 1;
            }
            Ordering::Greater => {
                // Present in new, absent from old: a genuinely new path.
                if !new.files[j].is_deleted() {
                    report.new_files += 1;
                    stats.account_new_file();
                }
                j += 1;
            }
        }
    }

    while i < old.files.len() {
        let mut deleted = old.files[i].clone();
        deleted.digest = crate::model::zero_hash();
        let was_already_deleted = deleted.is_deleted();
        if deleted.modifiers.is_boot {
            deleted.status = FileStatus::Ghosted;
        } else {
            deleted.status = FileStatus::Deleted;
        }
        if !was_already_deleted {
            deleted.last_change = new.version;
            report.deleted_files += 1;
            stats.account_deleted_file();
        }
        deleted.peer = Some(i);
        synthesized.push(deleted);
        i += 1;
    }
    while j < new.files.len() {
        if !new.files[j].is_deleted() {
            report.new_files += 1;
            stats.account_new_file();
        }
        j += 1;
    }

    if !drop_new.is_empty() {
        let drop_set: std::collections::HashSet<usize> = drop_new.into_iter().collect();
        let mut kept = Vec::with_capacity(new.files.len());
        for (idx, f) in new.files.drain(..).enumerate() {
            if !drop_set.contains(&idx) {
                kept.push(f);
            }
        }
        new.files = kept;
    }

    if !synthesized.is_empty() {
        new.files.extend(synthesized);
        new.sort_by_path();
        // peer indices into `old` are unaffected by sorting `new`, but any
        // `old -> new` peer index recorded before the sort is now stale;
        // recompute them with a direct lookup since paths are unique.
        for idx in 0..new.files.len() {
            if let Some(old_idx) = find_old_by_path(old, &new.files[idx].path) {
                new.files[idx].peer = Some(old_idx);
                old.files[old_idx].peer = Some(idx);
            }
        }
    }

    Ok(report)
}

fn find_old_by_path(old: &Manifest, path: &str) -> Option<usize> {
    old.files.iter().position(|f| f.path == path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileKind, FileRecord};

    fn record(path: &str, digest: &str, last_change: u32) -> FileRecord {
        let mut f = FileRecord::new(path, FileKind::Regular, last_change);
        f.digest = digest.to_string();
        f
    }

    #[test]
    fn unchanged_file_keeps_last_change() {
        let mut old = Manifest::new("os-core", 10, 1);
        old.files.push(record("/bin/a", &"a".repeat(64), 10));
        let mut new = Manifest::new("os-core", 20, 1);
        new.files.push(record("/bin/a", &"a".repeat(64), 20));

        let stats = BuildStats::new();
        let report = diff(&mut old, &mut new, 0, &stats).unwrap();

        assert_eq!(0, report.total());
        assert_eq!(10, new.files[0].last_change);
    }

    #[test]
    fn changed_content_bumps_last_change() {
        let mut old = Manifest::new("os-core", 10, 1);
        old.files.push(record("/bin/a", &"a".repeat(64), 10));
        let mut new = Manifest::new("os-core", 20, 1);
        new.files.push(record("/bin/a", &"b".repeat(64), 20));

        let stats = BuildStats::new();
        let report = diff(&mut old, &mut new, 0, &stats).unwrap();

        assert_eq!(1, report.changed_files);
        assert_eq!(20, new.files[0].last_change);
    }

    #[test]
    fn deleted_file_is_synthesized() {
        let mut old = Manifest::new("os-core", 10, 1);
        old.files.push(record("/bin/a", &"a".repeat(64), 10));
        let mut new = Manifest::new("os-core", 20, 1);

        let stats = BuildStats::new();
        let report = diff(&mut old, &mut new, 0, &stats).unwrap();

        assert_eq!(1, report.deleted_files);
        assert_eq!(1, new.files.len());
        assert!(new.files[0].is_deleted());
        assert_eq!(crate::model::zero_hash(), new.files[0].digest);
    }

    #[test]
    fn new_file_is_counted() {
        let mut old = Manifest::new("os-core", 10, 1);
        let mut new = Manifest::new("os-core", 20, 1);
        new.files.push(record("/bin/a", &"a".repeat(64), 20));

        let stats = BuildStats::new();
        let report = diff(&mut old, &mut new, 0, &stats).unwrap();

        assert_eq!(1, report.new_files);
    }

    #[test]
    fn type_change_across_versions_is_fatal() {
        let mut old = Manifest::new("os-core", 10, 1);
        old.files.push(record("/bin/a", &"a".repeat(64), 10));
        let mut new = Manifest::new("os-core", 20, 1);
        let mut dir_record = record("/bin/a", &"b".repeat(64), 20);
        dir_record.kind = FileKind::Directory;
        new.files.push(dir_record);

        let stats = BuildStats::new();
        let err = diff(&mut old, &mut new, 0, &stats).unwrap_err();

        assert!(matches!(err, crate::error::Error::TypeChange { .. }));
    }
}
