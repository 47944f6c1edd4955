use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use swupd_server::config::{GroupRoster, ServerConfig};
use swupd_server::driver::{self, BuildPaths};
use swupd_server::logbuild::BuildLog;

/// Builds manifests and fullfiles for a new OS version.
#[derive(Debug, Parser)]
#[clap(name = "swupd-create-update", author = "Peter Winckles <pwinckles@pm.me>", version)]
struct Args {
    /// Version number being built
    #[clap(long = "osversion", value_name = "N")]
    os_version: u32,

    /// Floor below which an unchanged file is still treated as changed
    #[clap(long = "minversion", value_name = "N", default_value_t = 0)]
    min_version: u32,

    /// On-disk manifest format integer
    #[clap(long = "format", value_name = "F")]
    format: u32,

    /// Root of the server's state directory
    #[clap(long = "statedir", value_name = "PATH", default_value = "/var/lib/update")]
    state_dir: PathBuf,

    /// Print the format integer and exit without building anything
    #[clap(long = "getformat")]
    get_format: bool,

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

    if args.get_format {
        println!("{}", args.format);
        return ExitCode::SUCCESS;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> swupd_server::error::Result<()> {
    let server_config = ServerConfig::load(&args.state_dir.join("server.ini"))?;
    let roster = GroupRoster::load(&args.state_dir.join("groups.ini")).unwrap_or_default();

    let paths = BuildPaths {
        image_base: server_config.image_base.clone(),
        output_dir: server_config.output_dir.clone(),
    };

    let old_version = match swupd_server::versions::latest_version(args.os_version, &server_config.output_dir)? {
        0 => server_config.initial_version,
        found => found,
    };
    let timestamp = chrono::Utc::now().timestamp() as u64;

    let log_prefix = args.state_dir.join("build-logs");
    std::fs::create_dir_all(&log_prefix)?;
    let mut build_log = BuildLog::open(&log_prefix, "full", old_version, args.os_version)?;

    let stats: Arc<swupd_server::stats::BuildStats> = driver::run_build(
        &paths,
        &roster,
        old_version,
        args.os_version,
        args.format,
        args.min_version,
        timestamp,
        &mut build_log,
    )?;

    println!("{}", stats.summary(old_version, args.os_version));
    println!("{}", stats.delta_summary());
    build_log.close(args.os_version, 0)?;
    Ok(())
}
