//! `updata-execute`: reads a previously computed plan from disk and drives
//! the package manager and the appliance REST API to apply it.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use updata::error::exit_code_for;
use updata::exec::privilege;
use updata::executor::{self, ExecutorContext};
use updata::logging::{self, log};
use updata::plan::Plan;
use updata::utils::paths::{
    DEFAULT_DNF_WORK_DIR, DEFAULT_REST_API_URL, DEFAULT_UPDATA_WORK_DIR, RUN_AS_USER,
};

/// Execute a previously computed update plan.
#[derive(Parser, Debug)]
#[command(name = "updata-execute", version)]
struct Cli {
    /// File containing an update plan.
    #[arg(short, long, value_name = "FILE")]
    plan: PathBuf,

    /// Do everything, but do not reboot the system.
    #[arg(long)]
    avoid_reboot: bool,

    /// Do nothing, but reboot the system if planned.
    #[arg(long)]
    reboot_only: bool,

    /// REST API base URL.
    #[arg(short = 'u', long, value_name = "URL", default_value = DEFAULT_REST_API_URL)]
    rest_api_url: String,

    /// Path to UpdaTA working directory.
    #[arg(short = 'w', long, value_name = "PATH", default_value = DEFAULT_UPDATA_WORK_DIR)]
    updata_work_dir: PathBuf,

    /// Path to dnf working directory.
    #[arg(short = 'd', long, value_name = "PATH", default_value = DEFAULT_DNF_WORK_DIR)]
    dnf_work_dir: PathBuf,

    /// Assume offline mode for testing, use PATH for the `/system-update`
    /// symlink.
    #[arg(long, value_name = "PATH")]
    test_offline_mode_path: Option<PathBuf>,

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

    log("updata_execute");

    let test_mode = cli.test_sysroot.is_some()
        || cli.test_version.is_some()
        || cli.test_offline_mode_path.is_some();
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

    let sysroot = cli.test_sysroot.unwrap_or_else(|| PathBuf::from("/"));

    let ctx = ExecutorContext::new(
        &sysroot,
        &cli.rest_api_url,
        cli.updata_work_dir,
        cli.dnf_work_dir,
        cli.avoid_reboot,
        cli.reboot_only,
        test_mode,
        cli.test_offline_mode_path,
    );

    let raw = std::fs::read_to_string(&cli.plan)
        .with_context(|| format!("reading plan file {}", cli.plan.display()))?;
    let plan: Plan = serde_json::from_str(&raw)
        .with_context(|| format!("invalid plan: {}", cli.plan.display()))?;

    if plan.is_empty() {
        bail!("invalid plan: {}", cli.plan.display());
    }

    executor::execute_plan(&plan, &ctx)
}
