//! End-to-end build scenarios exercising the driver and pack assembler
//! together, covering the six scenarios used as acceptance criteria for
//! the manifest/diff/fullfile/pack pipeline.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use swupd_server::config::GroupRoster;
use swupd_server::driver::{self, BuildPaths};
use swupd_server::logbuild::BuildLog;
use swupd_server::manifest_io;
use swupd_server::model::FileStatus;
use swupd_server::pack;
use swupd_server::stats::BuildStats;

fn write_file(path: &Path, contents: &[u8], mode: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

fn roster(sections: &str) -> GroupRoster {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(sections.as_bytes()).unwrap();
    GroupRoster::load(f.path()).unwrap()
}

fn run(paths: &BuildPaths, roster: &GroupRoster, old_v: u32, new_v: u32) -> std::sync::Arc<BuildStats> {
    let mut log = BuildLog::stdout_only();
    driver::run_build(paths, roster, old_v, new_v, 1, 0, 1_700_000_000, &mut log).unwrap()
}

/// Scenarios 1-4: empty-to-one, unchanged carry-forward, content change,
/// delete-then-re-add, all against a single `os-core` bundle.
#[test]
fn single_bundle_lifecycle() {
    let state = tempfile::tempdir().unwrap();
    let paths = BuildPaths {
        image_base: state.path().join("image"),
        output_dir: state.path().join("www"),
    };
    let roster = roster("[os-core]\nstatus=active\n");

    // Version 10: /bin/a appears for the first time.
    write_file(&paths.bundle_source_dir(10, "os-core").join("bin/a"), b"hello", 0o755);
    run(&paths, &roster, 0, 10);

    let m10 = manifest_io::read_manifest(&paths.manifest_text_path(10, "os-core"), "os-core", 10, 1).unwrap();
    let row10 = &m10.files[m10.find_path("/bin/a").unwrap()];
    assert_eq!(10, row10.last_change);
    assert_eq!(64, row10.digest.len());
    assert_ne!(swupd_server::model::zero_hash(), row10.digest);
    assert!(paths.files_dir(10).join(format!("{}.tar", row10.digest)).exists());

    let mom10 = manifest_io::read_manifest(&paths.manifest_text_path(10, "MoM"), "MoM", 10, 1).unwrap();
    assert!(mom10.sub_manifests.iter().any(|s| s.name == "os-core" && s.last_change == 10));

    // Version 20: /bin/a is byte-for-byte unchanged.
    write_file(&paths.bundle_source_dir(20, "os-core").join("bin/a"), b"hello", 0o755);
    run(&paths, &roster, 10, 20);

    let full20 = manifest_io::read_manifest(&paths.manifest_text_path(20, "full"), "full", 20, 1).unwrap();
    let row_full20 = &full20.files[full20.find_path("/bin/a").unwrap()];
    assert_eq!(10, row_full20.last_change, "unchanged content must keep its original last_change");

    // Version 30: /bin/a's content changes.
    write_file(&paths.bundle_source_dir(30, "os-core").join("bin/a"), b"world", 0o755);
    run(&paths, &roster, 20, 30);

    let m30 = manifest_io::read_manifest(&paths.manifest_text_path(30, "os-core"), "os-core", 30, 1).unwrap();
    let row30 = &m30.files[m30.find_path("/bin/a").unwrap()];
    assert_eq!(30, row30.last_change);
    assert_ne!(row10.digest, row30.digest);
    assert!(paths.files_dir(30).join(format!("{}.tar", row30.digest)).exists());

    // Version 40: /bin/a is deleted.
    fs::create_dir_all(paths.bundle_source_dir(40, "os-core")).unwrap();
    run(&paths, &roster, 30, 40);

    let m40 = manifest_io::read_manifest(&paths.manifest_text_path(40, "os-core"), "os-core", 40, 1).unwrap();
    let row40 = &m40.files[m40.find_path("/bin/a").unwrap()];
    assert_eq!(FileStatus::Deleted, row40.status);
    assert_eq!(swupd_server::model::zero_hash(), row40.digest);

    // Version 50: /bin/a reappears with its original (version-10) content.
    write_file(&paths.bundle_source_dir(50, "os-core").join("bin/a"), b"hello", 0o755);
    run(&paths, &roster, 40, 50);

    let m50 = manifest_io::read_manifest(&paths.manifest_text_path(50, "os-core"), "os-core", 50, 1).unwrap();
    let row50 = &m50.files[m50.find_path("/bin/a").unwrap()];
    assert_eq!(FileStatus::Present, row50.status);
    assert_eq!(row10.digest, row50.digest, "reappearing content reuses its original digest");
    assert_eq!(50, row50.last_change, "a re-add is still a change, even if the bytes match history");
}

/// Scenario 5: a bundle that includes `os-core` does not carry forward any
/// path `os-core` already ships.
#[test]
fn bundle_subtracts_included_paths() {
    let state = tempfile::tempdir().unwrap();
    let paths = BuildPaths {
        image_base: state.path().join("image"),
        output_dir: state.path().join("www"),
    };
    let roster = roster("[os-core]\nstatus=active\n\n[extras]\nstatus=active\ninclude=os-core\n");

    write_file(&paths.bundle_source_dir(10, "os-core").join("bin/a"), b"hello", 0o755);
    write_file(&paths.bundle_source_dir(10, "extras").join("bin/a"), b"hello", 0o755);
    write_file(&paths.bundle_source_dir(10, "extras").join("bin/only-extras"), b"unique", 0o755);
    run(&paths, &roster, 0, 10);

    let extras = manifest_io::read_manifest(&paths.manifest_text_path(10, "extras"), "extras", 10, 1).unwrap();
    assert!(extras.find_path("/bin/a").is_none(), "path shared with an included bundle must be subtracted");
    assert!(extras.find_path("/bin/only-extras").is_some(), "paths unique to the bundle survive subtraction");
}

/// A bundle subtracts against its whole transitive include chain, not just
/// the bundle it names directly: `extras` includes `os-core-update`, which
/// includes `os-core`, so `extras` must end up with neither bundle's files.
#[test]
fn bundle_subtracts_transitive_includes() {
    let state = tempfile::tempdir().unwrap();
    let paths = BuildPaths {
        image_base: state.path().join("image"),
        output_dir: state.path().join("www"),
    };
    let roster = roster(
        "[os-core]\nstatus=active\n\n\
         [os-core-update]\nstatus=active\ninclude=os-core\n\n\
         [extras]\nstatus=active\ninclude=os-core-update\n",
    );

    write_file(&paths.bundle_source_dir(10, "os-core").join("bin/a"), b"hello", 0o755);
    write_file(&paths.bundle_source_dir(10, "os-core-update").join("bin/b"), b"update", 0o755);
    write_file(&paths.bundle_source_dir(10, "extras").join("bin/a"), b"hello", 0o755);
    write_file(&paths.bundle_source_dir(10, "extras").join("bin/b"), b"update", 0o755);
    write_file(&paths.bundle_source_dir(10, "extras").join("bin/only-extras"), b"unique", 0o755);
    run(&paths, &roster, 0, 10);

    let extras = manifest_io::read_manifest(&paths.manifest_text_path(10, "extras"), "extras", 10, 1).unwrap();
    assert!(
        extras.find_path("/bin/a").is_none(),
        "a path two include-hops away must still be subtracted"
    );
    assert!(
        extras.find_path("/bin/b").is_none(),
        "path shared with the directly-included bundle must be subtracted"
    );
    assert!(extras.find_path("/bin/only-extras").is_some(), "paths unique to the bundle survive subtraction");
}

/// Scenario 6: a pack from an older to a newer version for one bundle
/// contains either a delta or a staged fullfile for every file that
/// changed, plus both manifest deltas `os-core` always ships.
#[test]
fn pack_covers_every_changed_file() {
    let state = tempfile::tempdir().unwrap();
    let paths = BuildPaths {
        image_base: state.path().join("image"),
        output_dir: state.path().join("www"),
    };
    let roster = roster("[os-core]\nstatus=active\n");

    write_file(&paths.bundle_source_dir(10, "os-core").join("bin/a"), b"hello, world, this is version ten", 0o644);
    run(&paths, &roster, 0, 10);

    write_file(
        &paths.bundle_source_dir(30, "os-core").join("bin/a"),
        b"hello, world, this is version thirty now",
        0o644,
    );
    run(&paths, &roster, 10, 30);

    let mut from_manifest =
        manifest_io::read_manifest(&paths.manifest_text_path(10, "os-core"), "os-core", 10, 1).unwrap();
    let mut to_manifest =
        manifest_io::read_manifest(&paths.manifest_text_path(30, "os-core"), "os-core", 30, 1).unwrap();

    let packstage = state.path().join("packstage");
    let stats = std::sync::Arc::new(BuildStats::new());
    let full_source_at = |version: u32, path: &str| -> Option<std::path::PathBuf> {
        let p = paths.full_dir(version).join(path.trim_start_matches('/'));
        p.is_file().then_some(p)
    };

    let pack_path = pack::build_pack(
        "os-core",
        &mut from_manifest,
        &mut to_manifest,
        10,
        30,
        &paths.manifest_text_path(10, "os-core"),
        &paths.manifest_text_path(30, "os-core"),
        &paths.delta_dir(30),
        &packstage,
        &paths.www_version_dir(30),
        &paths.files_dir(30),
        full_source_at,
        &stats,
    )
    .unwrap();

    assert!(pack_path.exists());

    let stage = pack::PackPaths::new(&packstage, "os-core", 10, 30).stage_dir;
    assert!(
        stage.join(format!("Manifest-os-core-delta-from-10")).exists(),
        "the bundle manifest delta always ships"
    );
    assert!(
        stage.join("Manifest-MoM-delta-from-10").exists(),
        "os-core packs additionally carry the MoM delta"
    );

    let to_row = &to_manifest.files[to_manifest.find_path("/bin/a").unwrap()];
    let delta_name = format!(
        "10-30-{}-{}",
        from_manifest.files[from_manifest.find_path("/bin/a").unwrap()].digest,
        to_row.digest
    );
    let has_delta = stage.join("delta").join(&delta_name).exists();
    let has_fullfile = stage.join("staged").join(&to_row.digest).exists();
    assert!(
        has_delta || has_fullfile,
        "a changed file must be satisfied by either a delta or a staged fullfile"
    );
}
