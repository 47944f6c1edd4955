use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use swupd_server::config::ServerConfig;
use swupd_server::driver::BuildPaths;
use swupd_server::logbuild::BuildLog;
use swupd_server::stats::BuildStats;
use swupd_server::{delta, manifest_io, pack};

/// Assembles the deltas and fullfiles a client needs to move one bundle from
/// `from` to `to` into a single pack archive.
#[derive(Debug, Parser)]
#[clap(name = "swupd-make-packs", author = "Peter Winckles <pwinckles@pm.me>", version)]
struct Args {
    /// Version to pack from
    from: u32,

    /// Version to pack to
    to: u32,

    /// Bundle (component) name
    bundle: String,

    /// Root of the server's state directory
    #[clap(long = "statedir", value_name = "PATH", default_value = "/var/lib/update")]
    state_dir: PathBuf,

    /// Base URL to fetch originals over HTTP when they're missing locally
    #[clap(long = "content-url", value_name = "URL")]
    content_url: Option<String>,

    /// Log to stdout instead of (in addition to) a per-build log file
    #[clap(long = "log-stdout")]
    log_stdout: bool,

    /// Suppress all logging
    #[clap(short, long)]
    quiet: bool,

    /// Increase log verbosity; repeatable
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    swupd_server::cli::init_logging(args.quiet, args.verbose);

    match run(&args) {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> swupd_server::error::Result<PathBuf> {
    let server_config = ServerConfig::load(&args.state_dir.join("server.ini"))?;
    let paths = BuildPaths {
        image_base: server_config.image_base.clone(),
        output_dir: server_config.output_dir.clone(),
    };

    let mut log = if args.log_stdout {
        BuildLog::stdout_only()
    } else {
        let log_prefix = args.state_dir.join("build-logs");
        std::fs::create_dir_all(&log_prefix)?;
        BuildLog::open(&log_prefix, &args.bundle, args.from, args.to)?
    };

    let mut from_manifest = manifest_io::read_manifest(
        &paths.manifest_text_path(args.from, &args.bundle),
        &args.bundle,
        args.from,
        1,
    )?;
    let mut to_manifest = manifest_io::read_manifest(
        &paths.manifest_text_path(args.to, &args.bundle),
        &args.bundle,
        args.to,
        1,
    )?;

    // Captured before `build_pack` takes `from_manifest` mutably, so the
    // content-url fallback below can look a path's digest up without
    // fighting the borrow checker.
    let from_digest_by_path: HashMap<String, String> = from_manifest
        .files
        .iter()
        .map(|f| (f.path.clone(), f.digest.clone()))
        .collect();

    let scratch = tempfile::tempdir()?;
    let packstage_dir = args.state_dir.join("packstage");
    let content_url = args.content_url.clone();
    let from_v = args.from;
    let image_base = paths.image_base.clone();
    let scratch_path = scratch.path().to_path_buf();

    let full_source_at = move |version: u32, path: &str| -> Option<PathBuf> {
        let local = image_base
            .join(version.to_string())
            .join("full")
            .join(path.trim_start_matches('/'));
        if local.exists() {
            return Some(local);
        }
        let url = content_url.as_ref()?;
        if version != from_v {
            return None;
        }
        let digest = from_digest_by_path.get(path)?;
        delta::fetch_missing_original(url, from_v, digest, &scratch_path).ok()
    };

    log.line(
        "phase",
        &format!("pack {} from {} to {}", args.bundle, args.from, args.to),
    )?;

    let stats = Arc::new(BuildStats::new());
    let pack_path = pack::build_pack(
        &args.bundle,
        &mut from_manifest,
        &mut to_manifest,
        args.from,
        args.to,
        &paths.manifest_text_path(args.from, &args.bundle),
        &paths.manifest_text_path(args.to, &args.bundle),
        &paths.delta_dir(args.to),
        &packstage_dir,
        &paths.www_version_dir(args.to),
        &paths.files_dir(args.to),
        full_source_at,
        &stats,
    )?;

    log.line("summary", &stats.delta_summary())?;
    log.close(args.to, 0)?;

    Ok(pack_path)
}
