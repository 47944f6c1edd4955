//! Subtraction & consolidation (component F).
//!
//! Grounded in `manifest.c`'s `subtract_manifests`/`subtract_manifest_frontend`
//! and the Manifest-of-Manifests consolidation pass.

use std::collections::HashMap;

use crate::model::{FileStatus, Manifest};

/// Removes from `m1.files` every row whose path also appears in `m2.files`
/// with the same `(status, kind)`, except rows deleted on both sides (kept,
/// since a client installing `m1` without `m2` still needs to know about the
/// deletion).
pub fn subtract(m1: &mut Manifest, m2: &Manifest) {
    let m2_by_path: HashMap<&str, &crate::model::FileRecord> =
        m2.files.iter().map(|f| (f.path.as_str(), f)).collect();

    m1.files.retain(|f1| match m2_by_path.get(f1.path.as_str()) {
        None => true,
        Some(f2) => {
            let both_deleted = f1.is_deleted() && f2.is_deleted();
            if both_deleted {
                true
            } else {
                !(f1.status == f2.status && f1.kind == f2.kind)
            }
        }
    });
}

/// Subtracts `m1` against `m2`, then against every manifest in `m2`'s
/// transitive include closure. `Subtract-frontend(M, M)` (the frontend called
/// with `m1 is m2`) only subtracts the closure, never `m2` itself.
pub fn subtract_frontend<'a, F>(m1: &mut Manifest, m2: &'a Manifest, resolve: F)
where
    F: Fn(&str) -> Option<&'a Manifest>,
{
    let is_self = m1.component == m2.component;
    if !is_self {
        subtract(m1, m2);
    }
    for name in m2.transitive_includes(&resolve) {
        if let Some(included) = resolve(name) {
            subtract(m1, included);
        }
    }
}

/// Classification used by the consolidation conflict matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsolidateState {
    DeletedPlain,
    DeletedRename,
    PresentSameHash,
    PresentOtherHash,
}

fn classify(f: &crate::model::FileRecord, other_digest: &str) -> ConsolidateState {
    if f.is_deleted() {
        if f.is_rename {
            ConsolidateState::DeletedRename
        } else {
            ConsolidateState::DeletedPlain
        }
    } else if f.digest == other_digest {
        ConsolidateState::PresentSameHash
    } else {
        ConsolidateState::PresentOtherHash
    }
}

/// Merges the sub-manifests of a Manifest-of-Manifests into one path-sorted
/// list, resolving path collisions via the A/B/C/D conflict matrix.
/// Conflicting pairs are logged and both rows dropped.
pub fn consolidate(sub_manifests: &[Manifest]) -> Manifest {
    let mut merged = Manifest::new("full-consolidated", 0, 1);
    let mut by_path: HashMap<String, crate::model::FileRecord> = HashMap::new();
    let mut conflicts = Vec::new();

    for sub in sub_manifests {
        for f in &sub.files {
            match by_path.remove(&f.path) {
                None => {
                    by_path.insert(f.path.clone(), f.clone());
                }
                Some(existing) => {
                    let state1 = classify(&existing, &f.digest);
                    let state2 = classify(f, &existing.digest);
                    use ConsolidateState::*;
                    let keep = match (state1, state2) {
                        (DeletedPlain, DeletedPlain) => Some(existing.clone()),
                        (DeletedPlain, _) => Some(f.clone()),
                        (_, DeletedPlain) => Some(existing.clone()),
                        (DeletedRename, DeletedRename) => Some(existing.clone()),
                        (DeletedRename, _) => Some(f.clone()),
                        (_, DeletedRename) => Some(existing.clone()),
                        (PresentSameHash, PresentSameHash) => Some(existing.clone()),
                        (PresentSameHash, PresentOtherHash) => None,
                        (PresentOtherHash, PresentSameHash) => None,
                        (PresentOtherHash, PresentOtherHash) => None,
                    };
                    match keep {
                        Some(record) => {
                            by_path.insert(record.path.clone(), record);
                        }
                        None => {
                            conflicts.push(f.path.clone());
                        }
                    }
                }
            }
        }
    }

    for path in &conflicts {
        log::warn!("consolidation conflict at {}: dropped", path);
        by_path.remove(path);
    }

    merged.files = by_path.into_values().collect();
    merged.sort_by_path();
    merged
}

/// The other half of the scanner's deferred digest computation: copies `digest`,
/// `stat`, and `kind` from `full`'s record onto the matching record in
/// `component`, leaving `last_change` untouched (the diff engine computes
/// that independently per bundle).
pub fn add_component_hashes_to_manifest(component: &mut Manifest, full: &Manifest) {
    let full_by_path: HashMap<&str, &crate::model::FileRecord> =
        full.files.iter().map(|f| (f.path.as_str(), f)).collect();

    for record in component.files.iter_mut() {
        if let Some(full_record) = full_by_path.get(record.path.as_str()) {
            record.digest = full_record.digest.clone();
            record.stat = full_record.stat;
            record.kind = full_record.kind;
        } else {
            record.status = FileStatus::Deleted;
            record.digest = crate::model::zero_hash();
        }
    }
}
