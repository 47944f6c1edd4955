//! Version history window (component P, ambient — supplements the core spec).
//!
//! Grounded verbatim in `versions.c::get_last_versions_list`: numbered
//! subdirectories of the published tree below `next_version` are classified
//! by `build_num % 10` into regular (`0`), dev (`9`, always dropped) or fix
//! (anything else, kept between retained regulars), then trimmed to at most
//! `max_versions` regular builds plus the nearest lower jump point (the
//! closest lower multiple of 100) so far-behind clients can still delta
//! part-way forward.

use std::fs;
use std::path::Path;

use crate::error::{IoReadDirSnafu, Result};
use snafu::ResultExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildType {
    Regular,
    Dev,
    Fix,
}

fn build_type(build_num: i64) -> BuildType {
    match build_num.rem_euclid(10) {
        0 => BuildType::Regular,
        9 => BuildType::Dev,
        _ => BuildType::Fix,
    }
}

fn jump_point(build_num: i64) -> i64 {
    let mut jp = (build_num / 100) * 100;
    if jp == build_num {
        jp -= 100;
    }
    jp.max(0)
}

/// Lists numeric subdirectory names of `www_dir` strictly below
/// `next_version`, descending.
fn list_candidate_versions(www_dir: &Path, next_version: u32) -> Result<Vec<i64>> {
    let mut versions = Vec::new();
    if !www_dir.exists() {
        return Ok(versions);
    }
    for entry in fs::read_dir(www_dir).context(IoReadDirSnafu {
        path: www_dir.to_path_buf(),
    })? {
        let entry = entry.context(IoReadDirSnafu {
            path: www_dir.to_path_buf(),
        })?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if let Ok(v) = name.parse::<i64>() {
            if v < next_version as i64 && entry.path().is_dir() {
                versions.push(v);
            }
        }
    }
    versions.sort_unstable_by(|a, b| b.cmp(a));
    Ok(versions)
}

/// The single newest published version strictly below `next_version`, or `0`
/// if none exists (a from-scratch build).
pub fn latest_version(next_version: u32, www_dir: &Path) -> Result<u32> {
    Ok(list_candidate_versions(www_dir, next_version)?
        .into_iter()
        .next()
        .unwrap_or(0) as u32)
}

/// Computes the trimmed recent-versions window for `next_version`.
pub fn recent_versions(next_version: u32, max_versions: usize, www_dir: &Path) -> Result<Vec<u32>> {
    let list = list_candidate_versions(www_dir, next_version)?;
    if list.is_empty() {
        return Ok(Vec::new());
    }

    let max_versions = max_versions as i64;
    let mut idx: i64 = 0;
    let mut jp: i64 = -1;
    let mut jp_found = false;
    let mut keep = vec![true; list.len()];

    for (i, &build_num) in list.iter().enumerate() {
        let bt = build_type(build_num);

        if (idx >= max_versions || bt == BuildType::Dev) && build_num != jp && build_num != 0 {
            keep[i] = false;
        } else if idx == max_versions - 1 && build_num != 0 {
            keep[i] = false;
            idx -= 1;
        }

        if build_num == jp {
            jp_found = true;
        }

        if bt == BuildType::Regular {
            idx += 1;
            if idx >= max_versions && !jp_found {
                if jp < 0 {
                    jp = jump_point(build_num);
                } else if build_num < jp {
                    jp = jump_point(jp);
                }
            }
        }
    }

    Ok(list
        .into_iter()
        .zip(keep)
        .filter(|(_, k)| *k)
        .map(|(v, _)| v as u32)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_versions(dir: &Path, versions: &[i64]) {
        for v in versions {
            fs::create_dir_all(dir.join(v.to_string())).unwrap();
        }
    }

    #[test]
    fn keeps_at_most_max_regular_builds() {
        let dir = tempfile::tempdir().unwrap();
        // Ten regular builds: 10, 20, ..., 100
        let versions: Vec<i64> = (1..=10).map(|n| n * 10).collect();
        make_versions(dir.path(), &versions);

        let kept = recent_versions(110, 3, dir.path()).unwrap();
        let regular_kept = kept.iter().filter(|&&v| v % 10 == 0).count();
        assert!(regular_kept <= 3 + 1, "expected at most max_versions regulars plus a jump point, got {:?}", kept);
    }

    #[test]
    fn excludes_versions_at_or_above_next() {
        let dir = tempfile::tempdir().unwrap();
        make_versions(dir.path(), &[10, 20, 30]);
        let kept = recent_versions(20, 5, dir.path()).unwrap();
        assert!(!kept.contains(&20));
        assert!(!kept.contains(&30));
    }

    #[test]
    fn empty_directory_yields_empty_window() {
        let dir = tempfile::tempdir().unwrap();
        let kept = recent_versions(100, 5, dir.path()).unwrap();
        assert!(kept.is_empty());
    }
}
