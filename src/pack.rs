//! Pack assembler (component I).
//!
//! Grounded in `pack.c`: for a `(bundle, from_v, to_v)` edge, build every
//! needed delta, then stage a delta-or-fullfile choice per changed file, then
//! tar the staged tree. Grounded also in `pack.c::explode_pack_stage`'s
//! policy of always extracting staged `.tar` fullfiles in place, since it's
//! worth the CPU time on the build side to save it on the client.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::delta::{self, SIZE_PENALTY};
use crate::diff;
use crate::error::{ArchiveWriteSnafu, Result};
use crate::model::{FileKind, Manifest};
use crate::pool::scoped_pool;
use crate::stats::BuildStats;
use qbsdiff::Bsdiff;
use snafu::ResultExt;

pub struct PackPaths {
    pub stage_dir: PathBuf,
    pub delta_dir: PathBuf,
    pub staged_dir: PathBuf,
}

impl PackPaths {
    pub fn new(packstage_dir: &Path, bundle: &str, from_v: u32, to_v: u32) -> Self {
        let stage_dir = packstage_dir.join(bundle).join(format!("{}_to_{}", from_v, to_v));
        PackPaths {
            delta_dir: stage_dir.join("delta"),
            staged_dir: stage_dir.join("staged"),
            stage_dir,
        }
    }
}

/// Clears and recreates the pack stage's `delta/` and `staged/` directories,
/// mirroring `empty_pack_stage`'s "clean stale data from a previous failed
/// run" behavior.
pub fn reset_stage(paths: &PackPaths) -> Result<()> {
    if paths.stage_dir.exists() {
        fs::remove_dir_all(&paths.stage_dir).context(ArchiveWriteSnafu {
            path: paths.stage_dir.clone(),
        })?;
    }
    fs::create_dir_all(&paths.delta_dir).context(ArchiveWriteSnafu {
        path: paths.delta_dir.clone(),
    })?;
    fs::create_dir_all(&paths.staged_dir).context(ArchiveWriteSnafu {
        path: paths.staged_dir.clone(),
    })?;
    Ok(())
}

struct DeltaTask {
    old_path: PathBuf,
    new_path: PathBuf,
    old_hash: String,
    new_hash: String,
    out_path: PathBuf,
}

/// Builds the pack for one bundle edge. `full_source_at(version, path)`
/// resolves a manifest path to its on-disk location under that version's
/// `full/` tree — the old and new sides of a pair live under *different*
/// version directories, so the version must travel with every lookup.
pub fn build_pack<F>(
    bundle: &str,
    from_manifest: &mut Manifest,
    to_manifest: &mut Manifest,
    from_v: u32,
    to_v: u32,
    from_manifest_text: &Path,
    to_manifest_text: &Path,
    delta_out_dir: &Path,
    packstage_dir: &Path,
    pack_out_dir: &Path,
    fullfile_dir: &Path,
    full_source_at: F,
    stats: &Arc<BuildStats>,
) -> Result<PathBuf>
where
    F: Fn(u32, &str) -> Option<PathBuf>,
{
    let paths = PackPaths::new(packstage_dir, bundle, from_v, to_v);
    reset_stage(&paths)?;

    diff::diff(from_manifest, to_manifest, 0, stats)?;

    let mut tasks = Vec::new();
    let mut seen = HashSet::new();
    for f in &to_manifest.files {
        if f.last_change <= from_v {
            continue;
        }
        if !matches!(f.kind, FileKind::Regular) {
            continue;
        }
        let peer = match f.peer.and_then(|idx| from_manifest.files.get(idx)) {
            Some(p) if !p.is_deleted() => p,
            _ => continue,
        };
        let out_path = delta::delta_path(delta_out_dir, from_v, f.last_change, &peer.digest, &f.digest);
        let key = (peer.last_change, f.last_change, f.digest.clone(), peer.digest.clone());
        if out_path.exists() || !seen.insert(key) {
            continue;
        }
        // The old side reads from the `from_v` full tree; the new side always
        // reads from `to_v`'s, since that's the only on-disk full/ snapshot
        // guaranteed to still hold every path's current content.
        let (old_path, new_path) = match (
            full_source_at(from_v, &peer.path),
            full_source_at(to_v, &f.path),
        ) {
            (Some(o), Some(n)) => (o, n),
            _ => continue,
        };
        tasks.push(DeltaTask {
            old_path,
            new_path,
            old_hash: peer.digest.clone(),
            new_hash: f.digest.clone(),
            out_path,
        });
    }

    run_delta_tasks(tasks, stats)?;

    for f in &to_manifest.files {
        if f.last_change <= from_v || f.status != crate::model::FileStatus::Present {
            continue;
        }
        let peer = f.peer.and_then(|idx| from_manifest.files.get(idx));
        let delta_candidate = peer.and_then(|p| {
            if p.is_deleted() || f.kind != FileKind::Regular {
                None
            } else {
                Some(delta::delta_path(delta_out_dir, from_v, f.last_change, &p.digest, &f.digest))
            }
        });

        let fullfile_path = fullfile_dir.join(format!("{}.tar", f.digest));
        let use_delta = match (&delta_candidate, fullfile_path.metadata()) {
            (Some(dp), Ok(full_meta)) if dp.exists() => {
                let delta_len = dp.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
                (delta_len as f64) * SIZE_PENALTY < full_meta.len() as f64
            }
            _ => false,
        };

        if use_delta {
            let dp = delta_candidate.unwrap();
            hard_link_into(&dp, &paths.delta_dir)?;
        } else if let Some(uncompressed) = full_source_at(to_v, &f.path).filter(|p| p.is_file()) {
            // Prefer the uncompressed source under full/, renamed to the
            // digest so the client can identify it the same way it would a
            // compressed-then-extracted fullfile.
            hard_link_named_into(&uncompressed, &paths.staged_dir, &f.digest)?;
        } else if fullfile_path.exists() {
            hard_link_into(&fullfile_path, &paths.staged_dir)?;
        }
    }

    explode_staged_tars(&paths.staged_dir)?;

    let manifest_delta_path = delta_out_dir.join(format!("Manifest-{}-delta-from-{}", bundle, from_v));
    build_manifest_delta(from_manifest_text, to_manifest_text, &manifest_delta_path)?;
    hard_link_into(&manifest_delta_path, &paths.stage_dir)?;

    if bundle == "os-core" {
        let mom_delta_path = delta_out_dir.join(format!("Manifest-MoM-delta-from-{}", from_v));
        if mom_delta_path.exists() {
            hard_link_into(&mom_delta_path, &paths.stage_dir)?;
        }
    }

    let pack_path = pack_out_dir.join(format!("pack-{}-from-{}.tar", bundle, from_v));
    tar_stage(&paths.stage_dir, &pack_path)?;
    Ok(pack_path)
}

fn run_delta_tasks(tasks: Vec<DeltaTask>, stats: &Arc<BuildStats>) -> Result<()> {
    let pool = scoped_pool("pack-delta", 1.0);
    let errors: Arc<std::sync::Mutex<Vec<crate::error::Error>>> =
        Arc::new(std::sync::Mutex::new(Vec::new()));

    for task in tasks {
        let stats = Arc::clone(stats);
        let errors = Arc::clone(&errors);
        pool.execute(move || {
            if let Err(e) = run_one_delta_task(&task, &stats) {
                errors.lock().unwrap().push(e);
            }
        });
    }
    pool.join();

    let mut errors = errors.lock().unwrap();
    if let Some(first) = errors.drain(..).next() {
        return Err(first);
    }
    Ok(())
}

fn run_one_delta_task(task: &DeltaTask, stats: &BuildStats) -> Result<()> {
    if !delta::xattrs_match(&task.old_path, &task.new_path)? {
        stats.account_delta_miss();
        return Ok(());
    }
    let old_bytes = fs::read(&task.old_path).context(ArchiveWriteSnafu {
        path: task.old_path.clone(),
    })?;
    let new_bytes = fs::read(&task.new_path).context(ArchiveWriteSnafu {
        path: task.new_path.clone(),
    })?;

    if let Some(patch) = delta::make_delta(&old_bytes, &new_bytes, stats)? {
        delta::write_delta(&task.out_path, &patch)?;
    }
    let _ = (&task.old_hash, &task.new_hash);
    Ok(())
}

/// Builds the per-pair manifest patch: a plain bsdiff between the bundle's
/// old and new `Manifest.<bundle>` text, named `Manifest-<bundle>-delta-from-<from_v>`.
/// Unlike file content deltas, this is written unconditionally — clients need
/// it to reconstruct the new manifest text regardless of its size relative
/// to the target.
fn build_manifest_delta(old_text: &Path, new_text: &Path, out_path: &Path) -> Result<()> {
    if out_path.exists() {
        return Ok(());
    }
    let old_bytes = fs::read(old_text).context(ArchiveWriteSnafu {
        path: old_text.to_path_buf(),
    })?;
    let new_bytes = fs::read(new_text).context(ArchiveWriteSnafu {
        path: new_text.to_path_buf(),
    })?;

    let mut patch = Vec::new();
    Bsdiff::new(&old_bytes, &new_bytes)
        .compare(&mut patch)
        .map_err(|e| crate::error::Error::InvariantViolation {
            details: format!("bsdiff failed for manifest delta: {}", e),
        })?;

    delta::write_delta(out_path, &patch)
}

fn hard_link_into(source: &Path, dest_dir: &Path) -> Result<()> {
    let name = source.file_name().expect("source has a filename").to_owned();
    hard_link_named_into(source, dest_dir, &name.to_string_lossy())
}

fn hard_link_named_into(source: &Path, dest_dir: &Path, dest_name: &str) -> Result<()> {
    fs::create_dir_all(dest_dir).context(ArchiveWriteSnafu {
        path: dest_dir.to_path_buf(),
    })?;
    let dest = dest_dir.join(dest_name);
    if dest.exists() {
        return Ok(());
    }
    fs::hard_link(source, &dest).context(ArchiveWriteSnafu {
        path: dest,
    })?;
    Ok(())
}

/// Extracts every `.tar` under `staged_dir` in place and removes the archive,
/// since clients prefer uncompressed pack content.
fn explode_staged_tars(staged_dir: &Path) -> Result<()> {
    if !staged_dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(staged_dir).context(ArchiveWriteSnafu {
        path: staged_dir.to_path_buf(),
    })? {
        let entry = entry.context(ArchiveWriteSnafu {
            path: staged_dir.to_path_buf(),
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("tar") {
            continue;
        }
        let file = fs::File::open(&path).context(ArchiveWriteSnafu { path: path.clone() })?;
        let mut archive = tar::Archive::new(file);
        archive.unpack(staged_dir).context(ArchiveWriteSnafu {
            path: staged_dir.to_path_buf(),
        })?;
        fs::remove_file(&path).context(ArchiveWriteSnafu { path })?;
    }
    Ok(())
}

/// Tars the whole stage directory with LZMA compression and numeric owner,
/// matching `pack.c`'s final archive step.
fn tar_stage(stage_dir: &Path, pack_path: &Path) -> Result<()> {
    let file = fs::File::create(pack_path).context(ArchiveWriteSnafu {
        path: pack_path.to_path_buf(),
    })?;
    let encoder = xz2::write::XzEncoder::new(file, 6);
    let mut builder = tar::Builder::new(encoder);
    builder.mode(tar::HeaderMode::Complete);
    builder
        .append_dir_all(".", stage_dir)
        .context(ArchiveWriteSnafu {
            path: pack_path.to_path_buf(),
        })?;
    builder
        .into_inner()
        .context(ArchiveWriteSnafu {
            path: pack_path.to_path_buf(),
        })?
        .finish()
        .context(ArchiveWriteSnafu {
            path: pack_path.to_path_buf(),
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_paths_lay_out_delta_and_staged_dirs() {
        let paths = PackPaths::new(Path::new("/state/packstage"), "os-core", 10, 30);
        assert_eq!(
            PathBuf::from("/state/packstage/os-core/10_to_30/delta"),
            paths.delta_dir
        );
        assert_eq!(
            PathBuf::from("/state/packstage/os-core/10_to_30/staged"),
            paths.staged_dir
        );
    }
}
