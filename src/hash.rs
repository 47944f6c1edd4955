//! Content digest computation (component A).
//!
//! Grounded in `analyze_fs.c`'s `compute_hash`/`hmac_compute_key`/`hmac_sha256_for_*`
//! trio, adapted to a two-level HMAC-SHA-256 construction:
//!
//! 1. An inner HMAC with an all-zero key, run over `stat bytes ++ xattr blob`,
//!    hex-encoded to 64 ASCII characters.
//! 2. An outer HMAC run over the file's actual content (file bytes for
//!    regular files, the link target string for symlinks, the fixed string
//!    `"directory"` for directories), keyed by that hex string — or by an
//!    empty key when the file carries no xattrs at all.
//!
//! This makes the digest sensitive to permissions, ownership and xattrs, not
//! just content, while keeping it independent of the path the file lives at.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::model::{zero_hash, FileKind, FileStat};

type HmacSha256 = Hmac<Sha256>;

/// The fixed message hashed for directories, making their digest a function of
/// stat bits and xattrs alone, never their name.
pub const DIRECTORY_MESSAGE: &[u8] = b"DIRECTORY";

/// The all-zero key used for the inner (key-derivation) HMAC.
const ZERO_KEY: [u8; 32] = [0u8; 32];

fn hmac_hex(key: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// The inner-level key: `hex(HMAC-SHA256(key = zeros, msg = stat bytes ++ xattr blob))`.
///
/// Its ASCII bytes become the outer HMAC key, unless there are no xattrs at
/// all, in which case the outer key is empty (`key_len` treated as zero).
pub fn content_key(stat: FileStat, xattr_blob: Option<&[u8]>) -> Vec<u8> {
    let mut message = stat.to_bytes();
    if let Some(blob) = xattr_blob {
        message.extend_from_slice(blob);
    }
    let hex_key = hmac_hex(&ZERO_KEY, &message);
    match xattr_blob {
        Some(_) => hex_key.into_bytes(),
        None => Vec::new(),
    }
}

/// Digests a regular file's content bytes.
pub fn digest_regular_file(stat: FileStat, xattr_blob: Option<&[u8]>, contents: &[u8]) -> String {
    let key = content_key(stat, xattr_blob);
    hmac_hex(&key, contents)
}

/// Digests a symlink by its target path text.
pub fn digest_symlink(stat: FileStat, xattr_blob: Option<&[u8]>, target: &str) -> String {
    let key = content_key(stat, xattr_blob);
    hmac_hex(&key, target.as_bytes())
}

/// Digests a directory; content is always the fixed [`DIRECTORY_MESSAGE`].
pub fn digest_directory(stat: FileStat, xattr_blob: Option<&[u8]>) -> String {
    let key = content_key(stat, xattr_blob);
    hmac_hex(&key, DIRECTORY_MESSAGE)
}

/// Dispatches on file kind the way `compute_hash` does, returning the
/// all-zero digest for anything that isn't actually present on disk.
pub fn digest_for_kind(
    kind: FileKind,
    stat: FileStat,
    xattr_blob: Option<&[u8]>,
    content: FileContent<'_>,
) -> String {
    match (kind, content) {
        (FileKind::Regular, FileContent::Bytes(bytes)) => {
            digest_regular_file(stat, xattr_blob, bytes)
        }
        (FileKind::Symlink, FileContent::LinkTarget(target)) => {
            digest_symlink(stat, xattr_blob, target)
        }
        (FileKind::Directory, _) => digest_directory(stat, xattr_blob),
        _ => zero_hash(),
    }
}

/// The content a digest is computed over, depending on file kind.
pub enum FileContent<'a> {
    Bytes(&'a [u8]),
    LinkTarget(&'a str),
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_digest_is_independent_of_name() {
        let stat = FileStat {
            mode: 0o40755,
            uid: 0,
            gid: 0,
            rdev: 0,
            size: 0,
        };
        let a = digest_directory(stat, None);
        let b = digest_directory(stat, None);
        assert_eq!(a, b);
        assert_eq!(64, a.len());
    }

    #[test]
    fn different_stat_bits_change_the_digest() {
        let mut stat = FileStat {
            mode: 0o100644,
            uid: 0,
            gid: 0,
            rdev: 0,
            size: 3,
        };
        let a = digest_regular_file(stat, None, b"abc");
        stat.mode = 0o100755;
        let b = digest_regular_file(stat, None, b"abc");
        assert_ne!(a, b);
    }

    #[test]
    fn xattrs_change_the_digest() {
        let stat = FileStat {
            mode: 0o100644,
            uid: 0,
            gid: 0,
            rdev: 0,
            size: 3,
        };
        let a = digest_regular_file(stat, None, b"abc");
        let b = digest_regular_file(stat, Some(b"user.foo\0bar"), b"abc");
        assert_ne!(a, b);
    }
}
