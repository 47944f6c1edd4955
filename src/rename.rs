//! Rename detector (component E).
//!
//! Grounded in `rename.c`'s scoring heuristic: new regular files are matched
//! against deleted regular files by a weighted-signal score, greedily
//! assigned highest-score-first, re-scored on conflict, and accepted only
//! above a fixed threshold.

use std::path::Path;

use crate::model::{FileKind, FileStatus, Manifest};

const ACCEPT_THRESHOLD: f64 = 15.0;
const BOOT_VMLINUZ_PREFIX: &str = "/boot/vmlinuz";

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

fn shared_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

fn letters_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphabetic()).collect()
}

fn trailing_segments_shared(a: &str, b: &str) -> usize {
    let a_segs: Vec<&str> = a.split('/').rev().collect();
    let b_segs: Vec<&str> = b.split('/').rev().collect();
    a_segs
        .iter()
        .zip(b_segs.iter())
        .take_while(|(x, y)| x == y)
        .count()
}

fn sniff_mime(path: &Path) -> Option<&'static str> {
    if !path.exists() {
        return None;
    }
    Some(tree_magic_mini::from_filepath(path)?)
}

/// Scores `new_path`/`new_size` against `old_path`/`old_size` for being the
/// same logical file under a new name. `same_digest` short-circuits to the
/// maximum score (a byte-identical rename is always accepted).
#[allow(clippy::too_many_arguments)]
fn score(
    new_path: &str,
    new_size: u64,
    old_path: &str,
    old_size: u64,
    same_digest: bool,
    new_fs_path: Option<&Path>,
    old_fs_path: Option<&Path>,
) -> f64 {
    if new_size == 0 || old_size == 0 {
        return -100.0;
    }

    let mut s = 0.0;
    if same_digest {
        s += 400.0;
    }
    if dirname(new_path) == dirname(old_path) {
        s += 10.0;
    }

    let new_base = basename(new_path);
    let old_base = basename(old_path);
    let new_stem = new_base.split('.').next().unwrap_or(new_base);
    let old_stem = old_base.split('.').next().unwrap_or(old_base);
    s += shared_prefix_len(new_stem, old_stem) as f64;

    if new_base == old_base {
        s += 35.0;
    }
    if letters_only(new_base) == letters_only(old_base) {
        s += 50.0;
    }
    s += (trailing_segments_shared(new_path, old_path) as f64) * 5.0;

    if new_path.starts_with(BOOT_VMLINUZ_PREFIX) && old_path.starts_with(BOOT_VMLINUZ_PREFIX) {
        s += 80.0;
    }

    let (small, large) = if new_size < old_size {
        (new_size, old_size)
    } else {
        (old_size, new_size)
    };
    s += small as f64 / large as f64;

    let ratio = new_size as f64 / old_size as f64;
    let diff_bytes = (new_size as i64 - old_size as i64).unsigned_abs();
    if !(0.75..=1.25).contains(&ratio) && diff_bytes > 1024 {
        s -= 30.0;
    }

    if let (Some(np), Some(op)) = (new_fs_path, old_fs_path) {
        if let (Some(nm), Some(om)) = (sniff_mime(np), sniff_mime(op)) {
            if nm != om {
                s -= 60.0;
            }
        }
    }

    s
}

/// Candidate paths for filesystem lookups (mime sniffing) during rename
/// detection, keyed by manifest path.
pub trait FsPathResolver {
    fn resolve(&self, manifest_path: &str) -> Option<std::path::PathBuf>;
}

/// No-op resolver: disables libmagic-based differentiation, which simply
/// means the −60 penalty never applies (matching the "sniffing failure"
/// best-effort fallback).
pub struct NoFsResolver;
impl FsPathResolver for NoFsResolver {
    fn resolve(&self, _manifest_path: &str) -> Option<std::path::PathBuf> {
        None
    }
}

/// Runs rename detection over `manifest`'s post-pair file list, mutating
/// matched records in place.
pub fn detect_renames(manifest: &mut Manifest, resolver: &dyn FsPathResolver) {
    let new_indices: Vec<usize> = manifest
        .files
        .iter()
        .enumerate()
        .filter(|(_, f)| {
            f.peer.is_none() && !f.is_deleted() && f.last_change == manifest.version && f.kind == FileKind::Regular
        })
        .map(|(i, _)| i)
        .collect();

    let mut deleted_indices: Vec<usize> = manifest
        .files
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_deleted() && f.kind == FileKind::Regular && f.peer.is_some())
        .map(|(i, _)| i)
        .collect();

    let mut candidates: Vec<(usize, f64, Option<usize>)> = new_indices
        .iter()
        .map(|&n| (n, f64::MIN, None))
        .collect();

    loop {
        if deleted_indices.is_empty() || candidates.is_empty() {
            break;
        }

        for cand in candidates.iter_mut() {
            let (n_idx, _, _) = *cand;
            let n = &manifest.files[n_idx];
            let n_path = resolver.resolve(&n.path);
            let mut best: Option<(usize, f64)> = None;
            for &d_idx in &deleted_indices {
                let d = &manifest.files[d_idx];
                let d_path = resolver.resolve(&d.path);
                let same_digest = n.digest == d.digest;
                let sc = score(
                    &n.path,
                    n.stat.size,
                    &d.path,
                    d.stat.size,
                    same_digest,
                    n_path.as_deref(),
                    d_path.as_deref(),
                );
                if best.map(|(_, bs)| sc > bs).unwrap_or(true) {
                    best = Some((d_idx, sc));
                }
            }
            if let Some((d_idx, sc)) = best {
                cand.1 = sc;
                cand.2 = Some(d_idx);
            }
        }

        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        let (n_idx, sc, d_idx) = candidates.remove(0);

        if sc < ACCEPT_THRESHOLD {
            break;
        }
        let d_idx = d_idx.expect("a scored candidate always has a best match");

        manifest.files[n_idx].is_rename = true;
        manifest.files[n_idx].rename_peer = Some(d_idx);
        manifest.files[n_idx].rename_score = sc;
        // The deleted-from row was synthesized with a zero digest; give it
        // back the content digest so the client can still locate the data.
        let original_digest = manifest.files[n_idx].digest.clone();
        manifest.files[d_idx].is_rename = true;
        manifest.files[d_idx].rename_peer = Some(n_idx);
        manifest.files[d_idx].digest = original_digest;

        deleted_indices.retain(|&d| d != d_idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileRecord;

    #[test]
    fn identical_digest_renames_are_accepted() {
        let mut m = Manifest::new("os-core", 20, 1);
        let mut old_deleted = FileRecord::new("/bin/old-name", FileKind::Regular, 20);
        old_deleted.status = FileStatus::Deleted;
        old_deleted.digest = "a".repeat(64);
        old_deleted.stat.size = 1000;
        old_deleted.peer = Some(0);

        let mut new_file = FileRecord::new("/bin/new-name", FileKind::Regular, 20);
        new_file.digest = "a".repeat(64);
        new_file.stat.size = 1000;

        m.files.push(old_deleted);
        m.files.push(new_file);

        detect_renames(&mut m, &NoFsResolver);

        assert!(m.files[0].is_rename);
        assert!(m.files[1].is_rename);
    }

    #[test]
    fn zero_size_never_matches() {
        let mut m = Manifest::new("os-core", 20, 1);
        let mut old_deleted = FileRecord::new("/bin/old", FileKind::Regular, 20);
        old_deleted.status = FileStatus::Deleted;
        old_deleted.stat.size = 0;
        old_deleted.peer = Some(0);
        let new_file = FileRecord::new("/bin/new", FileKind::Regular, 20);
        m.files.push(old_deleted);
        m.files.push(new_file);

        detect_renames(&mut m, &NoFsResolver);
        assert!(!m.files[1].is_rename);
    }
}
