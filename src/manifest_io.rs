//! Manifest text format read/write and archive wrapping (component C).
//!
//! Grounded in `manifest.c`'s `write_manifest_file`/`manifest_from_file`.
//! The header block is read line-by-line up to the first blank line; body
//! rows get a dedicated tab-splitting parser since they have fixed arity.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::error::{
    IoCreateSnafu, IoReadDirSnafu, IoReadSnafu, IoWriteSnafu, ManifestBadCodeSnafu,
    ManifestBadRowSnafu, ManifestMissingHeaderSnafu, ManifestTruncatedHeaderSnafu, Result,
};
use crate::model::{FileKind, FileRecord, FileStat, FileStatus, Manifest, Modifiers, SubManifestRef};
use snafu::{OptionExt, ResultExt};

/// Reads a manifest's plain-text form. A missing file is not an error: it
/// returns an empty manifest at `(version, component)`, matching the
/// original's handling of a bundle with no prior manifest.
pub fn read_manifest(path: &Path, component: &str, version: u32, format: u32) -> Result<Manifest> {
    if !path.exists() {
        return Ok(Manifest::new(component, version, format));
    }

    let file = File::open(path).context(IoReadSnafu {
        path: path.to_path_buf(),
    })?;
    let mut lines = BufReader::new(file).lines();

    let header_line = lines
        .next()
        .transpose()
        .context(IoReadSnafu {
            path: path.to_path_buf(),
        })?
        .context(ManifestMissingHeaderSnafu {
            path: path.to_path_buf(),
        })?;

    let mut parts = header_line.splitn(2, '\t');
    let tag = parts.next().unwrap_or("");
    if tag != "MANIFEST" {
        return ManifestMissingHeaderSnafu {
            path: path.to_path_buf(),
        }
        .fail();
    }
    let format_str = parts.next().unwrap_or("").to_string();
    let file_format: u32 = format_str
        .trim()
        .parse()
        .ok()
        .context(crate::error::ManifestBadFormatSnafu {
            path: path.to_path_buf(),
            value: format_str.clone(),
        })?;

    let mut manifest = Manifest::new(component, version, file_format);
    let mut includes = Vec::new();
    let mut header_closed = false;

    for line in &mut lines {
        let line = line.context(IoReadSnafu {
            path: path.to_path_buf(),
        })?;
        if line.is_empty() {
            header_closed = true;
            break;
        }
        let mut kv = line.splitn(2, ":\t");
        let key = kv.next().unwrap_or("");
        let value = kv.next().unwrap_or("").to_string();
        match key {
            "version" => manifest.version = value.trim().parse().unwrap_or(version),
            "previous" => manifest.prev_version = value.trim().parse().unwrap_or(0),
            "contentsize" => manifest.content_size = value.trim().parse().unwrap_or(0),
            "includes" => includes.push(value.trim().to_string()),
            "filecount" | "timestamp" => {}
            _ => {}
        }
    }
    if !header_closed {
        return ManifestTruncatedHeaderSnafu {
            path: path.to_path_buf(),
        }
        .fail();
    }
    manifest.includes = includes;

    let mut line_no = 1usize;
    for line in lines {
        line_no += 1;
        let line = line.context(IoReadSnafu {
            path: path.to_path_buf(),
        })?;
        if line.is_empty() {
            continue;
        }
        let record = parse_row(&line, path, line_no)?;
        if record.kind == FileKind::SubManifest {
            manifest.sub_manifests.push(SubManifestRef {
                name: record.path.trim_start_matches('/').to_string(),
                last_change: record.last_change,
            });
        }
        manifest.files.push(record);
    }
    manifest.sort_by_path();

    Ok(manifest)
}

fn parse_row(line: &str, path: &Path, line_no: usize) -> Result<FileRecord> {
    let mut fields = line.splitn(4, '\t');
    let code = fields.next().context(ManifestBadRowSnafu {
        path: path.to_path_buf(),
        line: line_no,
    })?;
    let digest = fields.next().context(ManifestBadRowSnafu {
        path: path.to_path_buf(),
        line: line_no,
    })?;
    let last_change = fields.next().context(ManifestBadRowSnafu {
        path: path.to_path_buf(),
        line: line_no,
    })?;
    let record_path = fields.next().context(ManifestBadRowSnafu {
        path: path.to_path_buf(),
        line: line_no,
    })?;

    if code.chars().count() != 4 {
        return ManifestBadCodeSnafu {
            path: path.to_path_buf(),
            line: line_no,
            code: code.to_string(),
        }
        .fail();
    }
    let mut chars = code.chars();
    let type_char = chars.next().unwrap();
    let status_char = chars.next().unwrap();
    let modifier_char = chars.next().unwrap();
    let rename_char = chars.next().unwrap();

    let kind = FileKind::from_char(type_char).context(ManifestBadCodeSnafu {
        path: path.to_path_buf(),
        line: line_no,
        code: code.to_string(),
    })?;
    let status = FileStatus::from_char(status_char).context(ManifestBadCodeSnafu {
        path: path.to_path_buf(),
        line: line_no,
        code: code.to_string(),
    })?;
    let modifiers = Modifiers::from_char(modifier_char).context(ManifestBadCodeSnafu {
        path: path.to_path_buf(),
        line: line_no,
        code: code.to_string(),
    })?;
    // An unrecognized rename char is ignored, not fatal.
    let is_rename = rename_char == 'r';

    let mut record = FileRecord::new(record_path.to_string(), kind, 0);
    record.status = status;
    record.modifiers = modifiers;
    record.is_rename = is_rename;
    record.digest = digest.to_string();
    record.last_change = last_change.trim().parse().unwrap_or(0);
    record.stat = FileStat::default();

    Ok(record)
}

/// Writes a manifest's plain-text form. `timestamp` is passed in rather than
/// sampled internally so writes are reproducible in tests.
pub fn write_manifest(path: &Path, manifest: &Manifest, timestamp: u64) -> Result<()> {
    let mut file = File::create(path).context(IoCreateSnafu {
        path: path.to_path_buf(),
    })?;

    writeln!(file, "MANIFEST\t{}", manifest.format).context(IoWriteSnafu {
        path: path.to_path_buf(),
    })?;
    writeln!(file, "version:\t{}", manifest.version).context(IoWriteSnafu {
        path: path.to_path_buf(),
    })?;
    writeln!(file, "previous:\t{}", manifest.prev_version).context(IoWriteSnafu {
        path: path.to_path_buf(),
    })?;
    writeln!(file, "filecount:\t{}", manifest.files.len()).context(IoWriteSnafu {
        path: path.to_path_buf(),
    })?;
    writeln!(file, "timestamp:\t{}", timestamp).context(IoWriteSnafu {
        path: path.to_path_buf(),
    })?;
    writeln!(file, "contentsize:\t{}", manifest.content_size).context(IoWriteSnafu {
        path: path.to_path_buf(),
    })?;
    for include in &manifest.includes {
        writeln!(file, "includes:\t{}", include).context(IoWriteSnafu {
            path: path.to_path_buf(),
        })?;
    }
    writeln!(file).context(IoWriteSnafu {
        path: path.to_path_buf(),
    })?;

    for record in &manifest.files {
        writeln!(
            file,
            "{}\t{}\t{}\t{}",
            record.code(),
            record.digest,
            record.last_change,
            record.path
        )
        .context(IoWriteSnafu {
            path: path.to_path_buf(),
        })?;
    }

    Ok(())
}

/// Wraps a plain-text manifest into `Manifest.<component>.tar`, PAX-restricted
/// with LZMA compression, preserving permissions.
pub fn wrap_manifest_archive(text_path: &Path, tar_path: &Path) -> Result<()> {
    let tar_file = File::create(tar_path).context(crate::error::ArchiveWriteSnafu {
        path: tar_path.to_path_buf(),
    })?;
    let encoder = xz2::write::XzEncoder::new(tar_file, 6);
    let mut builder = tar::Builder::new(encoder);
    builder.mode(tar::HeaderMode::Complete);
    builder
        .append_path_with_name(
            text_path,
            text_path.file_name().expect("manifest path has a filename"),
        )
        .context(crate::error::ArchiveWriteSnafu {
            path: tar_path.to_path_buf(),
        })?;
    builder
        .into_inner()
        .context(crate::error::ArchiveWriteSnafu {
            path: tar_path.to_path_buf(),
        })?
        .finish()
        .context(crate::error::ArchiveWriteSnafu {
            path: tar_path.to_path_buf(),
        })?;
    Ok(())
}

/// Computes the digest recorded against a Manifest-of-Manifests `M` row:
/// extract `tar_path`'s single entry into a scratch directory and hash its
/// bytes directly, so owner/permission differences baked into the tar
/// wrapper never affect the digest.
pub fn hash_manifest_archive(tar_path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};

    let scratch = tempfile::tempdir().context(IoCreateSnafu {
        path: tar_path.to_path_buf(),
    })?;

    let tar_file = File::open(tar_path).context(IoReadSnafu {
        path: tar_path.to_path_buf(),
    })?;
    let decoder = xz2::read::XzDecoder::new(tar_file);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(scratch.path()).context(crate::error::ArchiveWriteSnafu {
        path: tar_path.to_path_buf(),
    })?;

    let entry = std::fs::read_dir(scratch.path())
        .context(IoReadDirSnafu {
            path: scratch.path().to_path_buf(),
        })?
        .next()
        .context(ManifestMissingHeaderSnafu {
            path: tar_path.to_path_buf(),
        })?
        .context(IoReadDirSnafu {
            path: scratch.path().to_path_buf(),
        })?;

    let bytes = std::fs::read(entry.path()).context(IoReadSnafu {
        path: entry.path(),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_simple_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Manifest.os-core");

        let mut manifest = Manifest::new("os-core", 10, 1);
        let mut f = FileRecord::new("/bin/a", FileKind::Regular, 10);
        f.digest = "a".repeat(64);
        manifest.files.push(f);
        manifest.content_size = 5;

        write_manifest(&path, &manifest, 1_700_000_000).unwrap();
        let read_back = read_manifest(&path, "os-core", 10, 1).unwrap();

        assert_eq!(1, read_back.files.len());
        assert_eq!("/bin/a", read_back.files[0].path);
        assert_eq!("a".repeat(64), read_back.files[0].digest);
        assert_eq!(5, read_back.content_size);
    }

    #[test]
    fn missing_manifest_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Manifest.none");
        let manifest = read_manifest(&path, "none", 10, 1).unwrap();
        assert!(manifest.files.is_empty());
    }

    #[test]
    fn archive_digest_is_stable_across_permission_changes() {
        let dir = tempfile::tempdir().unwrap();
        let text_path = dir.path().join("Manifest.os-core");
        let tar_path = dir.path().join("Manifest.os-core.tar");

        let manifest = Manifest::new("os-core", 10, 1);
        write_manifest(&text_path, &manifest, 1_700_000_000).unwrap();
        wrap_manifest_archive(&text_path, &tar_path).unwrap();
        let first = hash_manifest_archive(&tar_path).unwrap();

        wrap_manifest_archive(&text_path, &tar_path).unwrap();
        let second = hash_manifest_archive(&tar_path).unwrap();

        assert_eq!(first, second);
        assert_eq!(64, first.len());
    }

    #[test]
    fn rejects_unknown_type_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Manifest.bad");
        std::fs::write(
            &path,
            "MANIFEST\t1\nversion:\t10\n\nZ..\t0000000000000000000000000000000000000000000000000000000000000000\t10\t/bin/a\n",
        )
        .unwrap();
        assert!(read_manifest(&path, "bad", 10, 1).is_err());
    }
}
