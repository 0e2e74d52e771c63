//! Subprocess execution, mirroring `strbo_repo.run_command`/`_mk_env`/
//! `_run_command_failure`.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::logging;

/// Result of a subprocess execution.
#[derive(Debug)]
pub struct CommandResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Options controlling how a command is run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Human-readable name for log messages; defaults to the joined argv.
    pub what: Option<String>,
    /// Prepend `/usr/local/sbin:/usr/sbin:/sbin` to `PATH` for this command,
    /// for commands that may live in sysadmin paths (`mount`, `dnf`).
    pub need_sbin_in_path: bool,
    /// Short-circuit: log what would have run and return success with no
    /// output instead of actually executing anything.
    pub test_mode: bool,
}

/// Runs `program args...` to completion, capturing stdout/stderr. In test
/// mode, logs the command it would have run and returns an empty success
/// result instead, exactly as `run_command(test_mode=True)` does.
pub fn run_command(program: &str, args: &[String], opts: &RunOptions) -> Result<CommandResult> {
    let label = opts.what.clone().unwrap_or_else(|| {
        std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    });

    if opts.test_mode {
        logging::log(&format!("TEST MODE: Would execute \"{label}\""));
        return Ok(CommandResult {
            success: true,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::default(),
        });
    }

    let start = Instant::now();
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());

    if opts.need_sbin_in_path {
        let mut path = std::env::var_os("PATH").unwrap_or_default();
        if !path.is_empty() {
            path.push(":");
        }
        path.push("/usr/local/sbin:/usr/sbin:/sbin");
        cmd.env("PATH", path);
    }

    let output = cmd
        .output()
        .with_context(|| format!("failed to execute \"{label}\""))?;

    let duration = start.elapsed();
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        logging::errormsg(&format!("command \"{label}\" FAILED: {stderr}"));
        logging::errormsg(&format!("failed command's stdout: {stdout}"));
        anyhow::bail!(
            "command \"{label}\" returned non-zero exit status {}\nSTDERR: {stderr}\nSTDOUT: {stdout}",
            output.status.code().unwrap_or(-1),
        );
    }

    Ok(CommandResult {
        success: true,
        exit_code: output.status.code().unwrap_or(0),
        stdout,
        stderr,
        duration,
    })
}
