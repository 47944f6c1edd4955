//! Driver (component J): orchestrates a full build from `old_version` to
//! `new_version` across every bundle named in the group roster.
//!
//! Grounded in `main.c`'s `main()`, which runs these phases in sequence:
//! union the bundle trees into `full/`, diff the full manifest, then for each
//! bundle scan/copy-digests/heuristics/subtract/diff/rename/write, then nest
//! everything under the Manifest-of-Manifests, then maximize `full`'s
//! `last_change` values against what bundles actually shipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::GroupRoster;
use crate::error::Result;
use crate::heuristics::apply_heuristics;
use crate::model::{FileKind, FileStatus, Manifest, SubManifestRef};
use crate::rename::{detect_renames, NoFsResolver};
use crate::stats::BuildStats;
use crate::{diff, fullfile, logbuild, manifest_io, scan, subtract};

pub struct BuildPaths {
    pub image_base: PathBuf,
    pub output_dir: PathBuf,
}

impl BuildPaths {
    pub fn version_image_dir(&self, version: u32) -> PathBuf {
        self.image_base.join(version.to_string())
    }

    pub fn full_dir(&self, version: u32) -> PathBuf {
        self.version_image_dir(version).join("full")
    }

    pub fn bundle_source_dir(&self, version: u32, bundle: &str) -> PathBuf {
        self.version_image_dir(version).join(bundle)
    }

    pub fn www_version_dir(&self, version: u32) -> PathBuf {
        self.output_dir.join(version.to_string())
    }

    pub fn manifest_text_path(&self, version: u32, component: &str) -> PathBuf {
        self.www_version_dir(version).join(format!("Manifest.{}", component))
    }

    pub fn manifest_tar_path(&self, version: u32, component: &str) -> PathBuf {
        self.www_version_dir(version)
            .join(format!("Manifest.{}.tar", component))
    }

    pub fn files_dir(&self, version: u32) -> PathBuf {
        self.www_version_dir(version).join("files")
    }

    pub fn delta_dir(&self, version: u32) -> PathBuf {
        self.www_version_dir(version).join("delta")
    }

    pub fn manifest_delta_path(&self, version: u32, component: &str, from_v: u32) -> PathBuf {
        self.delta_dir(version)
            .join(format!("Manifest-{}-delta-from-{}", component, from_v))
    }
}

/// Step 1: union every bundle's source tree into `full/`, `os-core` first,
/// then every other active bundle with "don't overwrite an existing path"
/// semantics (the rsync `--ignore-existing` equivalent).
pub fn union_bundle_trees(paths: &BuildPaths, version: u32, roster: &GroupRoster) -> Result<()> {
    let full_dir = paths.full_dir(version);
    std::fs::create_dir_all(&full_dir)?;

    let mut copy_opts = fs_extra::dir::CopyOptions::new();
    copy_opts.overwrite = false;
    copy_opts.skip_exist = true;
    copy_opts.content_only = true;

    let os_core_dir = paths.bundle_source_dir(version, "os-core");
    if os_core_dir.exists() {
        fs_extra::dir::copy(&os_core_dir, &full_dir, &copy_opts)
            .map_err(|e| io_err(&full_dir, e))?;
    }

    for bundle in roster.bundles() {
        if bundle.name == "os-core" {
            continue;
        }
        let bundle_dir = paths.bundle_source_dir(version, &bundle.name);
        if bundle_dir.exists() {
            fs_extra::dir::copy(&bundle_dir, &full_dir, &copy_opts)
                .map_err(|e| io_err(&full_dir, e))?;
        }
    }
    Ok(())
}

fn io_err(path: &Path, e: fs_extra::error::Error) -> crate::error::Error {
    crate::error::Error::IoGeneral {
        source: std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", path.display(), e)),
    }
}

/// Step 2-3: build and diff the synthetic `full` manifest.
pub fn build_full_manifest(
    paths: &BuildPaths,
    old_version: u32,
    new_version: u32,
    format: u32,
    minversion: u32,
    stats: &BuildStats,
) -> Result<(Manifest, Manifest)> {
    let mut old_full = manifest_io::read_manifest(
        &paths.manifest_text_path(old_version, "full"),
        "full",
        old_version,
        format,
    )?;
    let mut new_full = scan::scan_bundle("full", &paths.full_dir(new_version), new_version, format, true)?;

    apply_heuristics(&mut old_full);
    apply_heuristics(&mut new_full);
    diff::diff(&mut old_full, &mut new_full, minversion, stats)?;
    apply_heuristics(&mut new_full);

    Ok((old_full, new_full))
}

/// Result of processing one bundle (step 4).
pub struct BundleBuild {
    pub manifest: Manifest,
    pub changed: bool,
}

/// Step 4: build one bundle's manifest against the full union and the
/// roster's include graph.
///
/// `bundle_old_version` is the version at which this bundle's manifest was
/// *actually* last published — read from the old Manifest-of-Manifests'
/// sub-manifest row, not the global `old_version` the build was invoked
/// with (`main.c`'s `manifest_from_file(manifest_subversion(old_MoM,
/// group), group)`). A bundle whose content hasn't changed in several
/// builds keeps reusing an older manifest file on disk; looking it up by
/// the literal previous build version would silently find nothing and
/// treat every one of its files as brand new.
pub fn build_bundle_manifest(
    paths: &BuildPaths,
    bundle: &str,
    bundle_old_version: u32,
    new_version: u32,
    format: u32,
    minversion: u32,
    new_full: &Manifest,
    roster: &GroupRoster,
    resolved_news: &HashMap<String, Manifest>,
    stats: &BuildStats,
) -> Result<BundleBuild> {
    let mut old_manifest = manifest_io::read_manifest(
        &paths.manifest_text_path(bundle_old_version, bundle),
        bundle,
        bundle_old_version,
        format,
    )?;
    let mut new_manifest = scan::scan_bundle(
        bundle,
        &paths.bundle_source_dir(new_version, bundle),
        new_version,
        format,
        false,
    )?;

    subtract::add_component_hashes_to_manifest(&mut new_manifest, new_full);
    new_manifest.prev_version = old_manifest.version;

    if let Some(entry) = roster.find(bundle) {
        new_manifest.includes = entry.includes.clone();
    }

    apply_heuristics(&mut old_manifest);
    apply_heuristics(&mut new_manifest);

    // `subtract_frontend` needs to read `new_manifest`'s own `component`/
    // `includes` while subtracting into it, which a direct self-alias can't
    // satisfy; `new_manifest_view` is a files-free stand-in carrying just the
    // two fields the closure walk actually reads.
    let mut new_manifest_view = Manifest::new(new_manifest.component.clone(), new_manifest.version, new_manifest.format);
    new_manifest_view.includes = new_manifest.includes.clone();
    subtract::subtract_frontend(&mut new_manifest, &new_manifest_view, |name| resolved_news.get(name));

    let report = diff::diff(&mut old_manifest, &mut new_manifest, minversion, stats)?;

    if report.total() == 0 {
        new_manifest.version = old_manifest.version;
        return Ok(BundleBuild {
            manifest: new_manifest,
            changed: false,
        });
    }

    detect_renames(&mut new_manifest, &NoFsResolver);
    prune_ghosted_boot(&mut new_manifest);

    Ok(BundleBuild {
        manifest: new_manifest,
        changed: true,
    })
}

/// Drops deleted-boot rows down to ghosted, matching the driver's pruning
/// pass after deletion synthesis.
fn prune_ghosted_boot(manifest: &mut Manifest) {
    for f in manifest.files.iter_mut() {
        if f.status == FileStatus::Deleted && f.modifiers.is_boot {
            f.status = FileStatus::Ghosted;
        }
    }
}

/// Step 5: build the Manifest-of-Manifests nesting every bundle manifest.
///
/// Each sub-manifest row's digest is the hash of its published `.tar`
/// wrapper's extracted content, looked up in `archive_digests` by
/// component name; a bundle with no entry (e.g. a manifest write failed
/// upstream) falls back to the zero hash rather than aborting the build.
pub fn build_mom(
    new_version: u32,
    format: u32,
    bundles: &[&Manifest],
    archive_digests: &HashMap<String, String>,
) -> Manifest {
    let mut mom = Manifest::new("MoM", new_version, format);
    for bundle in bundles {
        mom.sub_manifests.push(SubManifestRef {
            name: bundle.component.clone(),
            last_change: bundle.version,
        });
        let digest = archive_digests
            .get(&bundle.component)
            .cloned()
            .unwrap_or_else(crate::model::zero_hash);
        mom.files.push(crate::model::FileRecord {
            path: format!("/{}", bundle.component),
            kind: FileKind::SubManifest,
            status: FileStatus::Present,
            modifiers: Default::default(),
            is_rename: false,
            digest,
            last_change: bundle.version,
            stat: Default::default(),
            peer: None,
            rename_peer: None,
            rename_score: 0.0,
            sub_manifest_version: bundle.version,
        });
    }
    mom.sort_by_path();
    mom
}

/// Step 6: raise `full`'s `last_change` for any path that a bundle shipped at
/// a higher version than `full` currently records, the "maximize to full"
/// pass (`main.c`'s post-MoM reconciliation).
pub fn maximize_to_full(full: &mut Manifest, bundles: &[&Manifest]) {
    let mut max_change: HashMap<&str, u32> = HashMap::new();
    for bundle in bundles {
        for f in &bundle.files {
            let entry = max_change.entry(f.path.as_str()).or_insert(0);
            if f.last_change > *entry {
                *entry = f.last_change;
            }
        }
    }
    for f in full.files.iter_mut() {
        if let Some(&max) = max_change.get(f.path.as_str()) {
            if max > f.last_change {
                f.last_change = max;
            }
        }
    }
}

/// Writes a manifest's text form and its compressed archive wrapper.
pub fn persist_manifest(paths: &BuildPaths, manifest: &Manifest, timestamp: u64) -> Result<()> {
    let version_dir = paths.www_version_dir(manifest.version);
    std::fs::create_dir_all(&version_dir)?;
    let text_path = paths.manifest_text_path(manifest.version, &manifest.component);
    manifest_io::write_manifest(&text_path, manifest, timestamp)?;
    let tar_path = paths.manifest_tar_path(manifest.version, &manifest.component);
    manifest_io::wrap_manifest_archive(&text_path, &tar_path)?;
    Ok(())
}

/// Runs the full build for `(old_version, new_version)` across `os-core` and
/// every active bundle in the roster, then the `full` manifest and MoM.
pub fn run_build(
    paths: &BuildPaths,
    roster: &GroupRoster,
    old_version: u32,
    new_version: u32,
    format: u32,
    minversion: u32,
    timestamp: u64,
    log: &mut logbuild::BuildLog,
) -> Result<Arc<BuildStats>> {
    let stats = Arc::new(BuildStats::new());

    log.line("phase", "union bundle trees into full/")?;
    union_bundle_trees(paths, new_version, roster)?;

    log.line("phase", "full manifest scan + diff")?;
    let (_old_full, mut new_full) =
        build_full_manifest(paths, old_version, new_version, format, minversion, &stats)?;

    let old_mom = manifest_io::read_manifest(
        &paths.manifest_text_path(old_version, "MoM"),
        "MoM",
        old_version,
        format,
    )?;

    let mut bundle_names: Vec<String> = vec!["os-core".to_string()];
    bundle_names.extend(roster.bundles().iter().map(|b| b.name.clone()).filter(|n| n != "os-core" && roster.is_active(n)));

    let mut built: HashMap<String, Manifest> = HashMap::new();
    let mut archive_digests: HashMap<String, String> = HashMap::new();
    for name in &bundle_names {
        log.line("phase", &format!("bundle {}", name))?;
        let bundle_old_version = old_mom
            .sub_manifests
            .iter()
            .find(|s| &s.name == name)
            .map(|s| s.last_change)
            .unwrap_or(old_version);
        let build = build_bundle_manifest(
            paths,
            name,
            bundle_old_version,
            new_version,
            format,
            minversion,
            &new_full,
            roster,
            &built,
            &stats,
        )?;
        if build.changed {
            persist_manifest(paths, &build.manifest, timestamp)?;
        }
        let tar_path = paths.manifest_tar_path(build.manifest.version, &build.manifest.component);
        if tar_path.exists() {
            archive_digests.insert(name.clone(), manifest_io::hash_manifest_archive(&tar_path)?);
        }
        built.insert(name.clone(), build.manifest);
    }

    let refs: Vec<&Manifest> = bundle_names.iter().filter_map(|n| built.get(n)).collect();
    let mom = build_mom(new_version, format, &refs, &archive_digests);
    persist_manifest(paths, &mom, timestamp)?;

    maximize_to_full(&mut new_full, &refs);
    persist_manifest(paths, &new_full, timestamp)?;

    log.line("phase", "emit fullfiles")?;
    fullfile::build_fullfiles(
        &new_full,
        new_version,
        &paths.full_dir(new_version),
        &paths.files_dir(new_version),
        &stats,
    )?;

    log.line("summary", &stats.summary(old_version, new_version))?;
    log.line("delta stats", &stats.delta_summary())?;

    Ok(stats)
}
