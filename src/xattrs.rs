//! Extended attribute handling.
//!
//! Grounded in `xattrs.c`: attribute names are fetched, sorted lexicographically,
//! and folded into a single blob of `<sorted, NUL-joined names><values in the
//! same order>`. The blob is opaque key material for [`crate::hash`]; it is
//! never written anywhere.

use crate::error::{IoGeneralSnafu, Result};
use snafu::ResultExt;
use std::path::Path;

/// Builds the xattr blob for `path`, or `None` if the file has no extended
/// attributes (the C code's `0xdeadcafe` sentinel collapses to `None` here).
pub fn xattr_blob(path: &Path) -> Result<Option<Vec<u8>>> {
    let mut names: Vec<String> = xattr::list(path)
        .context(IoGeneralSnafu)?
        .map(|n| n.to_string_lossy().into_owned())
        .collect();

    if names.is_empty() {
        return Ok(None);
    }
    names.sort();

    let mut blob = Vec::new();
    for name in &names {
        blob.extend_from_slice(name.as_bytes());
        blob.push(0);
    }
    for name in &names {
        blob.extend_from_slice(name.as_bytes());
        blob.push(0);
        if let Some(value) = xattr::get(path, name).context(IoGeneralSnafu)? {
            blob.extend_from_slice(&value);
        }
    }

    Ok(Some(blob))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn file_with_no_xattrs_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        File::create(&path).unwrap();
        assert!(xattr_blob(&path).unwrap().is_none());
    }
}
