//! `updata-determine-strategy`: reads current on-disk and remote state and
//! writes an upgrade plan as JSON, to stdout or `--output-file`.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use updata::error::exit_code_for;
use updata::exec::privilege;
use updata::logging::{self, log};
use updata::planner::{self, PlannerConfig};
use updata::utils::paths::{DEFAULT_MACHINE_NAME, RUN_AS_USER};
use updata::version::VersionNumber;

fn parse_target_version(s: &str) -> Result<VersionNumber, String> {
    VersionNumber::from_string(s, false).map_err(|e| e.to_string())
}

/// Determine upgrade path from current state to a given version number.
#[derive(Parser, Debug)]
#[command(name = "updata-determine-strategy", version)]
struct Cli {
    /// Where to write the upgrade plan to (default: stdout).
    #[arg(short, long, value_name = "FILE")]
    output_file: Option<PathBuf>,

    /// Base URL of StrBo package repository.
    #[arg(short = 'u', long, value_name = "URL")]
    base_url: String,

    /// Version number of the system the user wants to use; if none is
    /// specified, the latest available version is chosen.
    #[arg(short = 'v', long, value_name = "VERSION", value_parser = parse_target_version)]
    target_version: Option<VersionNumber>,

    /// Release line the user wants to use; if none is specified, then the
    /// current release line is retained.
    #[arg(short = 'r', long, value_name = "NAME")]
    target_release_line: Option<String>,

    /// System flavor the user wants to use; if none is specified, then the
    /// current flavor is retained; pass an empty string or the string
    /// "stable" to disable any flavor and return to the base distribution.
    #[arg(short = 'f', long, value_name = "NAME")]
    target_flavor: Option<String>,

    /// Update the system from image files through the recovery system,
    /// even if not strictly necessary.
    #[arg(short = 'i', long)]
    force_image_files: bool,

    /// If updating via image files, then update recovery system as well,
    /// even if not strictly necessary.
    #[arg(short = 's', long)]
    force_rsys_update: bool,

    /// Avoid erasing of user data in case the upgrade is done through the
    /// recovery system.
    #[arg(short = 'k', long)]
    keep_user_data: bool,

    /// Machine name of the Streaming Board, required for updating via
    /// image files.
    #[arg(short = 'm', long, value_name = "NAME", default_value = DEFAULT_MACHINE_NAME)]
    machine_name: String,

    /// Test environment root, replacing `/`.
    #[arg(long, value_name = "PATH")]
    test_sysroot: Option<PathBuf>,

    /// Set package version for testing.
    #[arg(long, value_name = "VERSION")]
    test_version: Option<String>,
}

fn main() {
    if let Err(e) = run() {
        log(&format!("Unhandled exception: {e}"));
        std::process::exit(exit_code_for(&e));
    }
}

fn run() -> Result<()> {
    logging::init();

    let cli = Cli::parse();

    log("updata_determine_strategy");

    let test_mode = cli.test_sysroot.is_some() || cli.test_version.is_some();
    let this_version = cli
        .test_version
        .clone()
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    log(&format!(
        "This is version {this_version}{}",
        if test_mode { " --- TEST MODE" } else { "" }
    ));

    if !test_mode {
        privilege::drop_to_user(RUN_AS_USER)?;
    }

    let test_sysroot = cli.test_sysroot.unwrap_or_else(|| PathBuf::from("/"));

    let config = PlannerConfig {
        base_url: cli.base_url,
        target_version: cli.target_version,
        target_release_line: cli.target_release_line,
        target_flavor: cli.target_flavor,
        force_image_files: cli.force_image_files,
        force_rsys_update: cli.force_rsys_update,
        keep_user_data: cli.keep_user_data,
        machine_name: cli.machine_name,
        test_sysroot,
        this_updata_version: this_version,
        test_mode,
    };

    let plan = planner::build_plan(&config)?;
    let json = serde_json::to_string(&plan)?;

    match cli.output_file {
        Some(path) => {
            File::create(&path)?.write_all(json.as_bytes())?;
        }
        None => {
            println!("{json}");
        }
    }

    Ok(())
}
