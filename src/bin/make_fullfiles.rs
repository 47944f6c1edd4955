use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use swupd_server::config::ServerConfig;
use swupd_server::driver::BuildPaths;
use swupd_server::stats::BuildStats;
use swupd_server::{fullfile, manifest_io};

/// Emits content-addressed fullfile archives for every distinct digest in a
/// version's `full` manifest.
#[derive(Debug, Parser)]
#[clap(name = "swupd-make-fullfiles", author = "Peter Winckles <pwinckles@pm.me>", version)]
struct Args {
    /// Version whose `full` manifest should be archived
    version: u32,

    /// Root of the server's state directory
    #[clap(long = "statedir", value_name = "PATH", default_value = "/var/lib/update")]
    state_dir: PathBuf,

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
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> swupd_server::error::Result<()> {
    let server_config = ServerConfig::load(&args.state_dir.join("server.ini"))?;
    let paths = BuildPaths {
        image_base: server_config.image_base.clone(),
        output_dir: server_config.output_dir.clone(),
    };

    let full = manifest_io::read_manifest(
        &paths.manifest_text_path(args.version, "full"),
        "full",
        args.version,
        1,
    )?;

    let stats = Arc::new(BuildStats::new());
    fullfile::build_fullfiles(
        &full,
        args.version,
        &paths.full_dir(args.version),
        &paths.files_dir(args.version),
        &stats,
    )?;

    println!("{}", stats.summary(0, args.version));
    Ok(())
}
