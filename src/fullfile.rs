//! Fullfile archiver (component G).
//!
//! Grounded in `fullfiles.c::create_fullfile`: each distinct content digest
//! gets one compressed tar archive, chosen as the smallest of LZMA/gzip/
//! bzip2. Directory entries are a special case with no content to compress.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ArchiveNoCodecSnafu, ArchiveWriteSnafu, Result};
use crate::model::{FileKind, FileStatus, Manifest};
use crate::pool::scoped_pool;
use crate::stats::BuildStats;
use snafu::ResultExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Lzma,
    Gzip,
    Bzip2,
}

const CODECS: [Codec; 3] = [Codec::Lzma, Codec::Gzip, Codec::Bzip2];

fn compress(codec: Codec, tar_bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    match codec {
        Codec::Lzma => {
            let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
            encoder.write_all(tar_bytes)?;
            encoder.finish()
        }
        Codec::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::best());
            encoder.write_all(tar_bytes)?;
            encoder.finish()
        }
        Codec::Bzip2 => {
            let mut encoder =
                bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
            encoder.write_all(tar_bytes)?;
            encoder.finish()
        }
    }
}

fn build_tar_for_regular(source: &Path, digest: &str) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.mode(tar::HeaderMode::Complete);
    builder.append_path_with_name(source, digest)?;
    builder.into_inner()
}

/// Picks the smallest of the three codecs for `tar_bytes`. Returns an error
/// only if every codec fails outright (not merely "larger").
fn best_of_n(tar_bytes: &[u8], out_path: &Path) -> Result<Vec<u8>> {
    let mut best: Option<Vec<u8>> = None;
    for codec in CODECS {
        match compress(codec, tar_bytes) {
            Ok(bytes) => {
                if best.as_ref().map(|b| bytes.len() < b.len()).unwrap_or(true) {
                    best = Some(bytes);
                }
            }
            Err(e) => log::warn!("{:?} codec failed for {}: {}", codec, out_path.display(), e),
        }
    }
    best.context(ArchiveNoCodecSnafu {
        path: out_path.to_path_buf(),
    })
}

fn atomic_write_readonly(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp).context(ArchiveWriteSnafu {
            path: path.to_path_buf(),
        })?;
        f.write_all(bytes).context(ArchiveWriteSnafu {
            path: path.to_path_buf(),
        })?;
    }
    fs::set_permissions(&tmp, fs::Permissions::from_mode(0o444)).context(ArchiveWriteSnafu {
        path: path.to_path_buf(),
    })?;
    fs::rename(&tmp, path).context(ArchiveWriteSnafu {
        path: path.to_path_buf(),
    })?;
    Ok(())
}

/// Archives one regular file's content at `source` into `files_dir/<digest>.tar`.
fn archive_regular(source: &Path, digest: &str, files_dir: &Path) -> Result<()> {
    let out_path = files_dir.join(format!("{}.tar", digest));
    if out_path.exists() {
        return Ok(());
    }
    let tar_bytes = build_tar_for_regular(source, digest).context(ArchiveWriteSnafu {
        path: out_path.clone(),
    })?;
    let winner = best_of_n(&tar_bytes, &out_path)?;
    atomic_write_readonly(&out_path, &winner)
}

/// Archives a directory entry. No compression trial: an empty PAX directory
/// entry is identical size under every codec, so this skips straight to a
/// plain tar (grounded in `fullfiles.c`'s directory special
/// case).
fn archive_directory(digest: &str, files_dir: &Path) -> Result<()> {
    let out_path = files_dir.join(format!("{}.tar", digest));
    if out_path.exists() {
        return Ok(());
    }
    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_dir(digest, ".")
        .context(ArchiveWriteSnafu {
            path: out_path.clone(),
        })?;
    let bytes = builder.into_inner().context(ArchiveWriteSnafu {
        path: out_path.clone(),
    })?;
    atomic_write_readonly(&out_path, &bytes)
}

/// Emits fullfiles for every distinct digest in `full` at `last_change ==
/// new_version` that isn't deleted. `source_root` resolves a manifest path to
/// its on-disk location under `full/`.
pub fn build_fullfiles(
    full: &Manifest,
    new_version: u32,
    source_root: &Path,
    files_dir: &Path,
    stats: &Arc<BuildStats>,
) -> Result<()> {
    fs::create_dir_all(files_dir).context(ArchiveWriteSnafu {
        path: files_dir.to_path_buf(),
    })?;

    let mut seen = HashSet::new();
    let mut work: Vec<(PathBuf, String, FileKind)> = Vec::new();
    for f in &full.files {
        if f.last_change != new_version || f.status != FileStatus::Present {
            continue;
        }
        if !seen.insert(f.digest.clone()) {
            continue;
        }
        let source = source_root.join(f.path.trim_start_matches('/'));
        work.push((source, f.digest.clone(), f.kind));
    }
    work.sort_by(|a, b| a.1.cmp(&b.1));

    let pool = scoped_pool("fullfile", 3.0);
    let errors: std::sync::Arc<std::sync::Mutex<Vec<crate::error::Error>>> =
        std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));

    for (source, digest, kind) in work {
        let files_dir = files_dir.to_path_buf();
        let errors = std::sync::Arc::clone(&errors);
        let stats = Arc::clone(stats);
        pool.execute(move || {
            let result = if kind == FileKind::Directory {
                archive_directory(&digest, &files_dir)
            } else {
                archive_regular(&source, &digest, &files_dir)
            };
            match result {
                Ok(()) => stats.account_changed_file(),
                Err(e) => errors.lock().unwrap().push(e),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileRecord;

    #[test]
    fn skips_already_archived_digests() {
        let dir = tempfile::tempdir().unwrap();
        let files_dir = dir.path().join("files");
        fs::create_dir_all(&files_dir).unwrap();
        let digest = "a".repeat(64);
        fs::write(files_dir.join(format!("{}.tar", digest)), b"existing").unwrap();

        archive_regular(Path::new("/does/not/exist"), &digest, &files_dir).unwrap();
        let contents = fs::read(files_dir.join(format!("{}.tar", digest))).unwrap();
        assert_eq!(b"existing".to_vec(), contents);
    }

    #[test]
    fn builds_fullfile_for_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let source_root = dir.path().join("full");
        fs::create_dir_all(source_root.join("bin")).unwrap();
        fs::write(source_root.join("bin/a"), b"hello").unwrap();
        let files_dir = dir.path().join("files");

        let mut full = Manifest::new("full", 10, 1);
        let mut f = FileRecord::new("/bin/a", FileKind::Regular, 10);
        f.digest = "a".repeat(64);
        full.files.push(f);

        let stats = Arc::new(BuildStats::new());
        build_fullfiles(&full, 10, &source_root, &files_dir, &stats).unwrap();

        assert!(files_dir.join(format!("{}.tar", "a".repeat(64))).exists());
    }
}
