//! Filesystem scanner (component B).
//!
//! Grounded in `analyze_fs.c`: walks a bundle root and produces file records
//! for every entry, illegal filenames rejected up front. The `full` bundle's
//! scan also computes digests concurrently through a worker pool; component
//! manifests get their digests copied in afterward (see
//! [`crate::subtract::add_component_hashes_to_manifest`]).

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use walkdir::WalkDir;

use crate::error::{IoReadDirSnafu, IoReadSnafu, IoStatSnafu, Result};
use crate::hash::{self, FileContent};
use crate::model::{FileKind, FileRecord, FileStat, Manifest};
use crate::pool::scoped_pool;
use crate::xattrs;
use snafu::ResultExt;

/// Characters that make a path unsafe to publish in a manifest row (it would
/// break the tab/space-delimited text format or a client-side shell
/// invocation built from the path).
const ILLEGAL_CHARS: &[char] = &[';', '&', '|', '*', '`', '/', '<', '>', '\\', '"', '\''];

fn is_legal_relative_path(rel: &str) -> bool {
    if rel.starts_with('+') || rel.contains("+package+") {
        return false;
    }
    // `/` is excluded from ILLEGAL_CHARS deliberately: it's the path separator.
    // Reject stray control characters and the remaining illegal punctuation
    // within each path *component*, not the joined path.
    rel.split('/')
        .all(|component| !component.chars().any(|c| ILLEGAL_CHARS.contains(&c) && c != '/'))
}

/// Scans `root`, populating every record's stat bits. Digests are computed
/// only when `compute_digests` is true (i.e. for the `full` bundle).
pub fn scan_bundle(
    component: &str,
    root: &Path,
    version: u32,
    format: u32,
    compute_digests: bool,
) -> Result<Manifest> {
    let mut manifest = Manifest::new(component, version, format);

    if !root.exists() {
        return scan_from_content_list(manifest, root, version, compute_digests);
    }

    let mut records = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.context(crate::error::WalkFileSnafu)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("walkdir entries are always under root");
        let rel_str = format!("/{}", rel.to_string_lossy());

        if !is_legal_relative_path(&rel_str) {
            log::warn!("rejecting illegal filename: {}", rel_str);
            continue;
        }

        let metadata = fs::symlink_metadata(entry.path()).context(IoStatSnafu {
            path: entry.path().to_path_buf(),
        })?;

        let kind = if metadata.file_type().is_symlink() {
            FileKind::Symlink
        } else if metadata.is_dir() {
            FileKind::Directory
        } else {
            FileKind::Regular
        };

        let mut stat = FileStat {
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            rdev: metadata.rdev(),
            size: metadata.len(),
        };
        // Mode/size are zeroed for symlinks/directories before hashing so the
        // digest is independent of them.
        match kind {
            FileKind::Symlink => stat.mode = 0,
            FileKind::Directory => stat.size = 0,
            FileKind::Regular => {}
            FileKind::SubManifest => {}
        }

        let mut record = FileRecord::new(rel_str, kind, version);
        record.stat = stat;
        records.push((entry.path().to_path_buf(), record));
    }

    if compute_digests {
        compute_digests_parallel(&mut records)?;
    }

    manifest.files = records.into_iter().map(|(_, r)| r).collect();
    manifest.sort_by_path();
    manifest.recompute_content_size();
    Ok(manifest)
}

/// When a bundle root is absent, a sibling `<root>.content.txt` lists the
/// paths it would have held, with the actual data living under the parallel
/// `full/` directory. Only honored at the top level: this
/// function is never called recursively.
fn scan_from_content_list(
    mut manifest: Manifest,
    root: &Path,
    version: u32,
    compute_digests: bool,
) -> Result<Manifest> {
    let file_name = match root.file_name() {
        Some(n) => n,
        None => return Ok(manifest),
    };
    let parent = root.parent().unwrap_or_else(|| Path::new("."));
    let content_list = parent.join(format!("{}.content.txt", file_name.to_string_lossy()));
    if !content_list.is_file() {
        return Ok(manifest);
    }
    let full_root = parent.join("full");

    let text = fs::read_to_string(&content_list).context(IoReadSnafu {
        path: content_list.clone(),
    })?;

    let mut records = Vec::new();
    for line in text.lines() {
        let rel = line.trim();
        if rel.is_empty() {
            continue;
        }
        let rel_trimmed = rel.trim_start_matches('/');
        let rel_str = format!("/{}", rel_trimmed);
        let source = full_root.join(rel_trimmed);

        let metadata = match fs::symlink_metadata(&source) {
            Ok(m) => m,
            Err(e) => {
                log::warn!(
                    "content list entry {} has no data under full/: {}",
                    rel_str,
                    e
                );
                continue;
            }
        };

        let kind = if metadata.file_type().is_symlink() {
            FileKind::Symlink
        } else if metadata.is_dir() {
            FileKind::Directory
        } else {
            FileKind::Regular
        };

        let mut stat = FileStat {
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            rdev: metadata.rdev(),
            size: metadata.len(),
        };
        match kind {
            FileKind::Symlink => stat.mode = 0,
            FileKind::Directory => stat.size = 0,
            FileKind::Regular => {}
            FileKind::SubManifest => {}
        }

        let mut record = FileRecord::new(rel_str, kind, version);
        record.stat = stat;
        records.push((source, record));
    }

    if compute_digests {
        compute_digests_parallel(&mut records)?;
    }

    manifest.files = records.into_iter().map(|(_, r)| r).collect();
    manifest.sort_by_path();
    manifest.recompute_content_size();
    Ok(manifest)
}

fn compute_digests_parallel(records: &mut [(std::path::PathBuf, FileRecord)]) -> Result<()> {
    let pool = scoped_pool("scan-hash", 1.0);
    let results: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(vec![None; records.len()]));

    for (idx, (path, record)) in records.iter().enumerate() {
        let path = path.clone();
        let kind = record.kind;
        let stat = record.stat;
        let results = Arc::clone(&results);
        pool.execute(move || {
            let digest = digest_one(&path, kind, stat);
            results.lock().unwrap()[idx] = Some(digest);
        });
    }
    pool.join();

    let digests = Arc::try_unwrap(results)
        .expect("all worker closures have completed by now")
        .into_inner()
        .unwrap();
    for ((_, record), digest) in records.iter_mut().zip(digests.into_iter()) {
        record.digest = digest.unwrap_or_else(crate::model::zero_hash);
    }
    Ok(())
}

fn digest_one(path: &Path, kind: FileKind, stat: FileStat) -> String {
    let blob = match xattrs::xattr_blob(path) {
        Ok(b) => b,
        Err(e) => {
            log::warn!("failed to read xattrs for {}: {}", path.display(), e);
            None
        }
    };

    match kind {
        FileKind::Regular => match fs::read(path) {
            Ok(bytes) => {
                hash::digest_for_kind(kind, stat, blob.as_deref(), FileContent::Bytes(&bytes))
            }
            Err(e) => {
                log::warn!("failed to read {}: {}", path.display(), e);
                crate::model::zero_hash()
            }
        },
        FileKind::Symlink => match fs::read_link(path) {
            Ok(target) => hash::digest_for_kind(
                kind,
                stat,
                blob.as_deref(),
                FileContent::LinkTarget(&target.to_string_lossy()),
            ),
            Err(e) => {
                log::warn!("failed to readlink {}: {}", path.display(), e);
                crate::model::zero_hash()
            }
        },
        FileKind::Directory => {
            hash::digest_for_kind(kind, stat, blob.as_deref(), FileContent::None)
        }
        FileKind::SubManifest => crate::model::zero_hash(),
    }
}

/// Lists immediate child directory names of `dir` whose names parse as `u32`,
/// used by the driver to enumerate bundle directories under a version root.
pub fn list_bundle_dirs(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    if !dir.exists() {
        return Ok(names);
    }
    for entry in fs::read_dir(dir).context(IoReadDirSnafu {
        path: dir.to_path_buf(),
    })? {
        let entry = entry.context(IoReadDirSnafu {
            path: dir.to_path_buf(),
        })?;
        if entry.file_type().context(IoReadDirSnafu {
            path: dir.to_path_buf(),
        })?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_illegal_filenames() {
        assert!(!is_legal_relative_path("/bin/+package+/a"));
        assert!(!is_legal_relative_path("/bin/a;rm"));
        assert!(is_legal_relative_path("/bin/a-1.2.so"));
    }

    #[test]
    fn scans_a_simple_tree() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/a"), b"hello").unwrap();
        let manifest = scan_bundle("os-core", dir.path(), 10, 1, true).unwrap();
        assert_eq!(2, manifest.files.len());
        let f = manifest.find_path("/bin/a").unwrap();
        assert_eq!(64, manifest.files[f].digest.len());
    }
}
