//! In-memory representation of manifests and the file records they contain.
//!
//! Mirrors `struct file` / `struct manifest` from the original C implementation,
//! but replaces owning linked-list pointers with plain `Vec<FileRecord>` storage
//! and index-based transient back-references (see `peer` / `rename_peer`).

use std::cmp::Ordering;

/// 64 lowercase hex characters, all zero. Means "absent content".
pub fn zero_hash() -> String {
    "0".repeat(64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    SubManifest,
}

impl FileKind {
    pub fn type_char(self) -> char {
        match self {
            FileKind::Regular => 'F',
            FileKind::Directory => 'D',
            FileKind::Symlink => 'L',
            FileKind::SubManifest => 'M',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'F' => Some(FileKind::Regular),
            'D' => Some(FileKind::Directory),
            'L' => Some(FileKind::Symlink),
            'M' => Some(FileKind::SubManifest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    Present,
    Deleted,
    Ghosted,
}

impl FileStatus {
    pub fn status_char(self) -> char {
        match self {
            FileStatus::Present => '.',
            FileStatus::Deleted => 'd',
            FileStatus::Ghosted => 'g',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '.' => Some(FileStatus::Present),
            'd' => Some(FileStatus::Deleted),
            'g' => Some(FileStatus::Ghosted),
            _ => None,
        }
    }

    pub fn is_deleted(self) -> bool {
        matches!(self, FileStatus::Deleted | FileStatus::Ghosted)
    }
}

/// Independent file modifier bits. The text format only has room for a single
/// modifier character per row, so `modifier_char` picks one by priority
/// (config, then state, then boot) the same way the original's single-pass
/// `dump_file_info`-adjacent writer only ever set one of these per file in
/// practice (config/state/boot heuristics are mutually exclusive path classes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    pub is_config: bool,
    pub is_state: bool,
    pub is_boot: bool,
}

impl Modifiers {
    pub fn modifier_char(self) -> char {
        if self.is_config {
            'C'
        } else if self.is_state {
            's'
        } else if self.is_boot {
            'b'
        } else {
            '.'
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '.' => Some(Modifiers::default()),
            'C' => Some(Modifiers {
                is_config: true,
                ..Default::default()
            }),
            's' => Some(Modifiers {
                is_state: true,
                ..Default::default()
            }),
            'b' => Some(Modifiers {
                is_boot: true,
                ..Default::default()
            }),
            _ => None,
        }
    }
}

/// Fixed-width `(mode, uid, gid, rdev, size)` tuple, the "stat bits" folded
/// into the digest key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FileStat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
}

impl FileStat {
    /// The raw bytes folded into the HMAC key, in host byte order, as a single
    /// contiguous struct (mirrors `hmac_compute_key`'s `memcpy` of `update_stat`).
    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 4 + 4 + 8 + 8);
        buf.extend_from_slice(&self.mode.to_ne_bytes());
        buf.extend_from_slice(&self.uid.to_ne_bytes());
        buf.extend_from_slice(&self.gid.to_ne_bytes());
        buf.extend_from_slice(&self.rdev.to_ne_bytes());
        buf.extend_from_slice(&self.size.to_ne_bytes());
        buf
    }
}

/// An entry describing one path in one manifest version.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: String,
    pub kind: FileKind,
    pub status: FileStatus,
    pub modifiers: Modifiers,
    pub is_rename: bool,
    /// 64-hex lowercase digest, or all-zero iff `status == Deleted`.
    pub digest: String,
    pub last_change: u32,
    pub stat: FileStat,

    /// Transient: index of the paired record in the opposite manifest's
    /// `files`, populated only during a diff operation. Never serialized.
    pub peer: Option<usize>,
    /// Transient: index of the rename counterpart in the same manifest's
    /// `files`, populated only during rename detection. Never serialized.
    pub rename_peer: Option<usize>,
    /// Transient: best rename score found so far for this record.
    pub rename_score: f64,

    /// Only meaningful when `kind == SubManifest`: version at which that
    /// sub-manifest last changed.
    pub sub_manifest_version: u32,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, kind: FileKind, last_change: u32) -> Self {
        FileRecord {
            path: path.into(),
            kind,
            status: FileStatus::Present,
            modifiers: Modifiers::default(),
            is_rename: false,
            digest: zero_hash(),
            last_change,
            stat: FileStat::default(),
            peer: None,
            rename_peer: None,
            rename_score: 0.0,
            sub_manifest_version: 0,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status.is_deleted()
    }

    pub fn is_regular(&self) -> bool {
        self.kind == FileKind::Regular
    }

    /// The 4-character type/status/modifier/rename code written as the first
    /// tab-separated field of a manifest row.
    pub fn code(&self) -> String {
        let mut s = String::with_capacity(4);
        s.push(self.kind.type_char());
        s.push(self.status.status_char());
        s.push(self.modifiers.modifier_char());
        s.push(if self.is_rename { 'r' } else { '.' });
        s
    }
}

/// A reference row in the Manifest-of-Manifests naming a bundle sub-manifest.
#[derive(Debug, Clone)]
pub struct SubManifestRef {
    pub name: String,
    pub last_change: u32,
}

/// A named, versioned list of file records plus sub-manifest references.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub component: String,
    pub version: u32,
    pub prev_version: u32,
    pub format: u32,
    pub files: Vec<FileRecord>,
    pub sub_manifests: Vec<SubManifestRef>,
    pub includes: Vec<String>,
    pub content_size: u64,
}

impl Manifest {
    pub fn new(component: impl Into<String>, version: u32, format: u32) -> Self {
        Manifest {
            component: component.into(),
            version,
            prev_version: 0,
            format,
            files: Vec::new(),
            sub_manifests: Vec::new(),
            includes: Vec::new(),
            content_size: 0,
        }
    }

    /// Every diff/subtract operation assumes `files` is sorted by path.
    pub fn sort_by_path(&mut self) {
        self.files.sort_by(|a, b| a.path.cmp(&b.path));
    }

    pub fn includes(&self, component: &str) -> bool {
        self.includes.iter().any(|c| c == component)
    }

    pub fn find_path(&self, path: &str) -> Option<usize> {
        self.files
            .binary_search_by(|f| f.path.as_str().cmp(path))
            .ok()
    }

    /// Recomputes `content_size`: the sum of regular-file sizes plus a fixed
    /// hint per link/directory, for rows uniquely contributed by this manifest
    /// (present, not deleted/ghosted).
    pub fn recompute_content_size(&mut self) {
        const NON_REGULAR_HINT: u64 = 4096;
        self.content_size = self
            .files
            .iter()
            .filter(|f| f.status == FileStatus::Present)
            .map(|f| match f.kind {
                FileKind::Regular => f.stat.size,
                _ => NON_REGULAR_HINT,
            })
            .sum();
    }

    /// Walk the transitive include closure of this manifest given a
    /// `{component -> manifest}` resolver. Cycles are treated as already-visited
    /// and skipped (sub-manifests form a DAG; cycles are forbidden outright,
    /// but the walk stays terminating even if one slips through).
    pub fn transitive_includes<'a, F>(&'a self, resolve: F) -> Vec<&'a str>
    where
        F: Fn(&str) -> Option<&'a Manifest>,
    {
        let mut seen = Vec::new();
        let mut stack: Vec<&str> = self.includes.iter().map(|s| s.as_str()).collect();
        while let Some(name) = stack.pop() {
            if seen.contains(&name) {
                continue;
            }
            seen.push(name);
            if let Some(m) = resolve(name) {
                for inc in &m.includes {
                    if !seen.contains(&inc.as_str()) {
                        stack.push(inc.as_str());
                    }
                }
            }
        }
        seen
    }
}

/// Orders two paths the way the manifest body is sorted: plain lexicographic
/// byte order over the UTF-8 path, matching `file_sort_filename`'s `strcmp`.
pub fn path_cmp(a: &str, b: &str) -> Ordering {
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips() {
        let mut f = FileRecord::new("/bin/a", FileKind::Regular, 10);
        f.modifiers.is_config = true;
        f.is_rename = true;
        assert_eq!("F.Cr", f.code());
    }

    #[test]
    fn deleted_status_reports_deleted() {
        let mut f = FileRecord::new("/bin/a", FileKind::Regular, 10);
        f.status = FileStatus::Ghosted;
        assert!(f.is_deleted());
    }

    #[test]
    fn manifest_sorts_by_path() {
        let mut m = Manifest::new("os-core", 10, 1);
        m.files.push(FileRecord::new("/bin/b", FileKind::Regular, 10));
        m.files.push(FileRecord::new("/bin/a", FileKind::Regular, 10));
        m.sort_by_path();
        assert_eq!("/bin/a", m.files[0].path);
        assert_eq!("/bin/b", m.files[1].path);
    }

    #[test]
    fn content_size_skips_deleted_rows() {
        let mut m = Manifest::new("os-core", 10, 1);
        let mut present = FileRecord::new("/bin/a", FileKind::Regular, 10);
        present.stat.size = 100;
        m.files.push(present);
        let mut deleted = FileRecord::new("/bin/b", FileKind::Regular, 10);
        deleted.status = FileStatus::Deleted;
        deleted.digest = zero_hash();
        m.files.push(deleted);
        m.recompute_content_size();
        assert_eq!(100, m.content_size);
    }
}
