//! Plan execution: the step dispatch and the two-phase offline package
//! install.
//!
//! The executor is a single `match` over [`Step`](crate::plan::Step)
//! variants (see [`execute_plan`]); the two-phase `dnf-install` state
//! machine lives in [`dnf_install`] and its helpers [`download_all_packages`]
//! and [`apply_offline_update`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;

use crate::artifacts;
use crate::error::UpdataError;
use crate::exec::subprocess::{self, RunOptions};
use crate::logging::{errormsg, log};
use crate::plan::{Plan, Step, UpdataUpdateMode};
use crate::repo::PackageManagerVariables;
use crate::rest::ApplianceClient;

/// Raised internally by `dnf-install`'s phase 1 to unwind out to `main`,
/// which reboots and exits 0.
pub struct ExitForOfflineUpdate;

/// Everything a step handler needs: the CLI-equivalent flags plus the
/// collaborators (package manager variables, REST client) constructed once
/// up front.
pub struct ExecutorContext {
    pub avoid_reboot: bool,
    pub reboot_only: bool,
    pub updata_work_dir: PathBuf,
    pub dnf_work_dir: PathBuf,
    pub test_mode: bool,
    pub test_offline_mode_path: Option<PathBuf>,
    pub sudo_required: bool,
    pub dnf_vars: PackageManagerVariables,
    pub rest: ApplianceClient,
    offline_symlink: PathBuf,
}

impl ExecutorContext {
    pub fn new(
        sysroot: &Path,
        rest_api_url: &str,
        updata_work_dir: PathBuf,
        dnf_work_dir: PathBuf,
        avoid_reboot: bool,
        reboot_only: bool,
        test_mode: bool,
        test_offline_mode_path: Option<PathBuf>,
    ) -> Self {
        ExecutorContext {
            avoid_reboot,
            reboot_only,
            updata_work_dir,
            dnf_work_dir,
            test_mode,
            test_offline_mode_path,
            sudo_required: true,
            dnf_vars: PackageManagerVariables::new(sysroot.join("etc/dnf/vars")),
            rest: ApplianceClient::new(rest_api_url),
            offline_symlink: PathBuf::from("/system-update"),
        }
    }

    fn offline_mode_symlink(&self) -> &Path {
        self.test_offline_mode_path
            .as_deref()
            .unwrap_or(&self.offline_symlink)
    }

    fn in_offline_mode(&self) -> bool {
        match &self.test_offline_mode_path {
            Some(_) => true,
            None => self.offline_symlink.exists(),
        }
    }

    fn run_opts(&self, what: impl Into<String>) -> RunOptions {
        RunOptions {
            what: Some(what.into()),
            need_sbin_in_path: true,
            test_mode: self.test_mode,
        }
    }

    fn run(&self, program: &str, args: &[String], what: impl Into<String>) -> Result<()> {
        subprocess::run_command(program, args, &self.run_opts(what))?;
        Ok(())
    }

    /// Prefixes `args` with `sudo` when running privileged.
    fn privileged(&self, args: &[&str]) -> Vec<String> {
        let mut full = Vec::new();
        if self.sudo_required {
            full.push("sudo".to_string());
        }
        full.extend(args.iter().map(|s| s.to_string()));
        full
    }
}

fn log_step(step: &Step, msg: impl AsRef<str>) {
    log(&format!("{}: {}", step.action(), msg.as_ref()));
}

/// Runs every step of `plan` in order. Returns `Ok(true)` if execution
/// should continue normally to process exit 0, `Ok(false)` after an
/// `ExitForOfflineUpdate` has already rebooted and the caller should exit 0
/// immediately without logging further steps.
pub fn execute_plan(plan: &Plan, ctx: &ExecutorContext) -> Result<()> {
    for step in plan {
        log(&format!(
            "Step: {}",
            serde_json::to_string(step).unwrap_or_default()
        ));

        match dispatch(step, ctx) {
            Ok(()) => log_step(step, "Done"),
            Err(e) => {
                if e.chain().any(|c| c.downcast_ref::<ExitForOfflineUpdate>().is_some()) {
                    reboot_system(&Step::RebootSystem {}, ctx)?;
                    std::process::exit(0);
                }

                if let Some(UpdataError::RebootFailed(msg)) =
                    e.chain().find_map(|c| c.downcast_ref::<UpdataError>())
                {
                    errormsg(&format!("Failed to reboot: {msg}"));
                    return Err(e);
                }

                if let Some(reqwest_err) =
                    e.chain().find_map(|c| c.downcast_ref::<reqwest::Error>())
                {
                    if reqwest_err.is_connect() {
                        errormsg(&format!("Failed connecting to server: {reqwest_err}"));
                        return Err(e);
                    }
                }

                return Err(e);
            }
        }
    }

    Ok(())
}

impl std::fmt::Debug for ExitForOfflineUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExitForOfflineUpdate")
    }
}
impl std::fmt::Display for ExitForOfflineUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "exiting for offline update")
    }
}
impl std::error::Error for ExitForOfflineUpdate {}

fn dispatch(step: &Step, ctx: &ExecutorContext) -> Result<()> {
    match step {
        Step::Nop { .. } => do_nop(step),
        Step::ManageRepos { .. } => do_manage_repos(step, ctx),
        Step::DnfInstall { .. } => dnf_install(step, ctx),
        Step::DnfDistroSync {} => do_dnf_distro_sync(step, ctx),
        Step::RebootSystem {} => reboot_system(step, ctx),
        Step::RunInstaller { .. } => do_run_installer(step, ctx),
        Step::RecoverSystem { .. } => do_recover_system(step, ctx),
    }
}

fn do_nop(step: &Step) -> Result<()> {
    if let Step::Nop {
        original_updata_version,
    } = step
    {
        log_step(step, format!("Plan generated by version {original_updata_version}"));
    }
    Ok(())
}

fn do_manage_repos(step: &Step, ctx: &ExecutorContext) -> Result<()> {
    if ctx.reboot_only || ctx.in_offline_mode() {
        return Ok(());
    }

    let Step::ManageRepos {
        base_url,
        release_line,
        disable_flavor,
        enable_flavor,
    } = step
    else {
        unreachable!()
    };

    let mut log_write = |name: &str, value: &str| {
        log_step(step, format!("Set dnf variable {name} = {value}"));
    };

    ctx.dnf_vars
        .write_var("strbo_release_line", release_line, Some(&mut log_write))?;
    ctx.dnf_vars
        .write_var("strbo_update_baseurl", base_url, Some(&mut log_write))?;
    ctx.dnf_vars
        .write_var("strbo_base_enabled", "1", Some(&mut log_write))?;

    let enabled = match enable_flavor {
        Some(flavor) => ctx
            .dnf_vars
            .write_var("strbo_flavor", flavor, Some(&mut log_write))?,
        None => false,
    };

    if !enabled {
        if let Some(flavor) = disable_flavor {
            if !flavor.is_empty() {
                ctx.dnf_vars
                    .write_var("strbo_flavor_enabled", "0", Some(&mut log_write))?;
            }
        }
    }

    Ok(())
}

fn dnf_install(step: &Step, ctx: &ExecutorContext) -> Result<()> {
    if ctx.reboot_only {
        return Ok(());
    }

    if !ctx.in_offline_mode() {
        download_all_packages(step, ctx)?;
        bail!(ExitForOfflineUpdate);
    }

    apply_offline_update(step, ctx)
}

/// Phase 1: clean dnf state, download the target manifest, `dnf install
/// --downloadonly` everything it lists, and mark entry into offline mode
/// with the `/system-update` symlink.
fn download_all_packages(step: &Step, ctx: &ExecutorContext) -> Result<()> {
    let Step::DnfInstall {
        requested_version,
        version_file_url,
        ..
    } = step
    else {
        unreachable!()
    };

    log_step(step, "Cleaning up dnf state");
    run_privileged(ctx, &["dnf", "clean", "packages", "--assumeyes"], "dnf prepare")?;

    let tempfiles = ctx
        .dnf_work_dir
        .canonicalize()
        .unwrap_or_else(|_| ctx.dnf_work_dir.clone())
        .join("tempfiles.json");
    if ctx.sudo_required {
        run_privileged(
            ctx,
            &["/bin/rm", "-f", &tempfiles.display().to_string()],
            "dnf delete tempfiles.json",
        )?;
    } else if !ctx.test_mode {
        let _ = std::fs::remove_file(&tempfiles);
    } else {
        log(&format!("TEST MODE: Would unlink file {}", tempfiles.display()));
    }

    log_step(step, format!("Downloading manifest for version {requested_version}"));
    let package_list = artifacts::manifest_package_list(version_file_url)?;

    let manifest_path = ctx.updata_work_dir.join("manifest.txt");
    let manifest_body = if package_list.is_empty() {
        String::new()
    } else {
        package_list.join("\n") + "\n"
    };
    std::fs::write(&manifest_path, manifest_body)
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    log_step(step, format!("Downloading up to {} packages", package_list.len()));

    if !package_list.is_empty() {
        let mut args = vec!["dnf".to_string(), "install".to_string(), "--assumeyes".to_string(), "--downloadonly".to_string()];
        args.extend(package_list.iter().cloned());
        run_privileged_owned(ctx, args, "dnf download")?;
    }

    log_step(step, "Entering update mode");

    let resolved_dnf_dir = ctx
        .dnf_work_dir
        .canonicalize()
        .unwrap_or_else(|_| ctx.dnf_work_dir.clone());
    let symlink = ctx.offline_mode_symlink();

    if ctx.sudo_required {
        run_privileged(
            ctx,
            &[
                "ln",
                "-s",
                &resolved_dnf_dir.display().to_string(),
                &symlink.display().to_string(),
            ],
            "dnf download done",
        )?;
    } else if !ctx.test_mode {
        std::os::unix::fs::symlink(&resolved_dnf_dir, symlink)
            .with_context(|| format!("symlinking {} -> {}", symlink.display(), resolved_dnf_dir.display()))?;
    }

    if ctx.test_mode {
        log(&format!(
            "TEST MODE: Would count number of entries in {}",
            symlink.join("tempfiles.json").display()
        ));
        return Ok(());
    }

    match read_tempfiles(&symlink.join("tempfiles.json")) {
        Ok(list) => log_step(step, format!("Can install {} downloaded packages", list.len())),
        Err(e) => log_step(step, format!("NO packages downloaded: {e}")),
    }

    Ok(())
}

fn run_privileged(ctx: &ExecutorContext, args: &[&str], what: impl Into<String>) -> Result<()> {
    let full = ctx.privileged(args);
    ctx.run(&full[0], &full[1..], what)
}

fn run_privileged_owned(ctx: &ExecutorContext, args: Vec<String>, what: impl Into<String>) -> Result<()> {
    let refs: Vec<&str> = args.iter().map(String::as_str).collect();
    run_privileged(ctx, &refs, what)
}

fn read_tempfiles(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let list: Vec<String> = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(list)
}

/// Phase 2: consume the package list left by phase 1, install everything
/// but UpdaTA itself (if deferred), compute and remove residual packages
/// not in the target manifest, then install/remove the deferred UpdaTA
/// packages last.
fn apply_offline_update(step: &Step, ctx: &ExecutorContext) -> Result<()> {
    let Step::DnfInstall { updata_update, .. } = step else {
        unreachable!()
    };

    let symlink = ctx.offline_mode_symlink();
    let package_list = match read_tempfiles(&symlink.join("tempfiles.json")) {
        Ok(list) => Some(list),
        Err(e) => {
            errormsg(&format!("Failed to read dnf package list: {e}"));
            None
        }
    };

    if ctx.sudo_required {
        run_privileged(ctx, &["rm", &symlink.display().to_string()], "dnf begin offline update")?;
    } else {
        let _ = std::fs::remove_file(symlink);
    }

    let mut updata_update_mode = *updata_update;
    let with_deferred_updata = updata_update_mode.is_some();

    let mut main_packages = package_list.unwrap_or_default();
    let mut deferred_update: Vec<String> = Vec::new();

    if with_deferred_updata && !main_packages.is_empty() {
        let mut kept = Vec::new();
        for package_path in main_packages.drain(..) {
            let name = Path::new(&package_path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| package_path.clone());

            if !name.starts_with("updata-") {
                kept.push(package_path);
                continue;
            }

            log_step(step, format!("Deferring installation of {name}"));
            deferred_update.push(package_path);

            if updata_update_mode == Some(UpdataUpdateMode::DeferredRemoval) {
                log_step(
                    step,
                    "WARNING: Planned UpdaTA update mode indicates REMOVAL of UpdaTA, but \
                     the package is still going to be INSTALLED as it is listed in the \
                     target version manifest! Very likely, this is a BUG!",
                );
                log_step(step, "WARNING: Switching update mode to \"deferred_downgrade\"");
                updata_update_mode = Some(UpdataUpdateMode::DeferredDowngrade);
            }
        }
        main_packages = kept;
    }

    log_step(step, format!("Installing {} packages", main_packages.len()));
    if !main_packages.is_empty() {
        let mut args = vec![
            "dnf".to_string(),
            "install".to_string(),
            "--assumeyes".to_string(),
            "--allowerasing".to_string(),
            "--setopt".to_string(),
            "keepcache=True".to_string(),
        ];
        args.extend(main_packages.iter().cloned());
        run_privileged_owned(ctx, args, "dnf install")?;
    }

    log_step(step, "Running ldconfig after installing packages");
    run_privileged(ctx, &["ldconfig"], "ldconfig after install")?;

    let manifest_path = ctx.updata_work_dir.join("manifest.txt");
    let manifest_set: HashSet<String> = match std::fs::read_to_string(&manifest_path) {
        Ok(raw) => raw.lines().map(|l| l.trim().to_string()).collect(),
        Err(e) => {
            errormsg(&format!("Failed to read manifest: {e}"));
            HashSet::new()
        }
    };

    let installed = list_installed_packages(ctx)?;

    let mut residual = Vec::new();
    let mut deferred_residual = Vec::new();

    for (name, arch, version) in installed {
        let package = format!("{name}-{version}.{arch}");

        if with_deferred_updata && name.starts_with("updata") {
            if updata_update_mode == Some(UpdataUpdateMode::DeferredRemoval) {
                log_step(step, format!("Deferring explicit removal of {package}"));
                deferred_residual.push(package);
            } else {
                log_step(step, format!("Not removing {package}, will update later"));
            }
        } else if !manifest_set.is_empty() && !manifest_set.contains(&package) {
            residual.push(package);
        }
    }

    log_step(step, format!("Removing {} residual packages", residual.len()));
    if !residual.is_empty() {
        let mut args = vec!["dnf".to_string(), "remove".to_string(), "--assumeyes".to_string(), "--allowerasing".to_string()];
        args.extend(residual);
        run_privileged_owned(ctx, args, "dnf remove")?;
    }

    log_step(step, "Running ldconfig after removing packages");
    run_privileged(ctx, &["ldconfig"], "ldconfig after removal")?;

    if with_deferred_updata {
        log_step(step, "Processing deferred packages");

        log_step(step, format!("Installing {} packages", deferred_update.len()));
        if !deferred_update.is_empty() {
            let mut args = vec![
                "dnf".to_string(),
                "install".to_string(),
                "--assumeyes".to_string(),
                "--allowerasing".to_string(),
                "--setopt".to_string(),
                "keepcache=True".to_string(),
            ];
            args.extend(deferred_update);
            run_privileged_owned(ctx, args, "dnf install deferred")?;
        }

        log_step(step, format!("Removing {} residual packages", deferred_residual.len()));
        if !deferred_residual.is_empty() {
            let mut args = vec!["dnf".to_string(), "remove".to_string(), "--assumeyes".to_string(), "--allowerasing".to_string()];
            args.extend(deferred_residual);
            run_privileged_owned(ctx, args, "dnf remove deferred")?;
        }
    } else {
        log_step(step, "No deferred package processing");
    }

    log_step(step, "Cleaning up downloaded packages");
    run_privileged(ctx, &["dnf", "clean", "packages", "--assumeyes"], "dnf cleanup")?;

    let _ = std::fs::remove_file(&manifest_path);

    Ok(())
}

/// Parses `dnf list --installed` output into `(name, arch, version)`
/// triples, stripping the `epoch:` prefix dnf sometimes reports.
fn list_installed_packages(ctx: &ExecutorContext) -> Result<Vec<(String, String, String)>> {
    let args = ctx.privileged(&["dnf", "list", "--installed"]);
    let opts = ctx.run_opts("dnf list");
    let result = subprocess::run_command(&args[0], &args[1..], &opts)?;

    let mut packages = Vec::new();
    for line in result.stdout.lines() {
        let mut fields = line.split_whitespace();
        let (Some(name_arch), Some(version), Some(_repo)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };

        let Some((name, arch)) = name_arch.rsplit_once('.') else {
            continue;
        };

        let version = match version.split_once(':') {
            Some((_, v)) => v,
            None => version,
        };

        packages.push((name.to_string(), arch.to_string(), version.to_string()));
    }

    Ok(packages)
}

fn do_dnf_distro_sync(step: &Step, ctx: &ExecutorContext) -> Result<()> {
    if ctx.reboot_only || ctx.in_offline_mode() {
        return Ok(());
    }

    log_step(step, "Synchronizing with latest distro version");
    run_privileged(ctx, &["dnf", "distro-sync", "--assumeyes"], "dnf distro-sync")
}

fn reboot_system(step: &Step, ctx: &ExecutorContext) -> Result<()> {
    if ctx.avoid_reboot {
        return Ok(());
    }

    log_step(step, "Requesting system reboot");
    let args = ctx.privileged(&["systemctl", "isolate", "reboot.target"]);

    subprocess::run_command(&args[0], &args[1..], &ctx.run_opts("reboot"))
        .map_err(|e| UpdataError::RebootFailed(e.to_string()))?;

    Ok(())
}

fn do_run_installer(step: &Step, ctx: &ExecutorContext) -> Result<()> {
    if ctx.reboot_only || ctx.in_offline_mode() {
        return Ok(());
    }

    let Step::RunInstaller {
        requested_version,
        installer_url,
        ..
    } = step
    else {
        unreachable!()
    };

    log_step(step, format!("Replacing recovery system for {requested_version}"));
    ctx.rest
        .post_form("recovery_data", "replace_system", &[("dataurl", installer_url.as_str())])?;

    log_step(step, "Verifying recovery system");
    ctx.rest.post_empty("recovery_data", "verify_system")?;

    log_step(step, "Checking recovery system version");
    let info = ctx.rest.get_status_info("recovery_data", "system_info")?;

    if info.status.state != "valid" {
        return Err(UpdataError::RestValidationFailure {
            endpoint: "system_info".to_string(),
            state: info.status.state.clone(),
        }
        .into());
    }

    log_step(
        step,
        format!(
            "Recovery system version line {} flavor {} version {}",
            info.version_info.release_line, info.version_info.flavor, info.version_info.number
        ),
    );

    Ok(())
}

fn ensure_recovery_data(step: &Step, ctx: &ExecutorContext) -> Result<()> {
    if ctx.reboot_only {
        return Ok(());
    }

    let Step::RecoverSystem {
        requested_line,
        requested_version,
        requested_flavor,
        recovery_data_url,
        ..
    } = step
    else {
        unreachable!()
    };

    match recovery_data_url {
        Some(url) => {
            log_step(step, format!("Replacing recovery data -> {requested_version}"));
            ctx.rest
                .post_form("recovery_data", "replace_data", &[("dataurl", url.as_str())])?;
        }
        None => {
            log_step(
                step,
                format!("Not replacing recovery data, should be {requested_version} already"),
            );
        }
    }

    log_step(step, "Verifying recovery data");
    ctx.rest.post_empty("recovery_data", "verify_data")?;

    log_step(step, "Checking recovery data version");
    let info = ctx.rest.get_status_info("recovery_data", "data_info")?;

    if info.status.state != "valid" {
        return Err(UpdataError::RestValidationFailure {
            endpoint: "data_info".to_string(),
            state: info.status.state.clone(),
        }
        .into());
    }

    let got_version = info.version_info.number.trim_start_matches('V');
    let want_version = requested_version.trim_start_matches('V');

    if got_version != want_version
        || info.version_info.release_line != *requested_line
        || info.version_info.flavor != *requested_flavor
    {
        return Err(UpdataError::RestValidationFailure {
            endpoint: "data_info".to_string(),
            state: format!(
                "mismatch: line {} flavor {} version {}, expected line {requested_line} flavor {requested_flavor} version {requested_version}",
                info.version_info.release_line, info.version_info.flavor, info.version_info.number
            ),
        }
        .into());
    }

    Ok(())
}

fn reboot_into_recovery_system(step: &Step, ctx: &ExecutorContext) -> Result<()> {
    if ctx.avoid_reboot {
        return Ok(());
    }

    let Step::RecoverSystem { keep_user_data, .. } = step else {
        unreachable!()
    };

    log_step(step, "Request system reboot into recovery system");
    let body = json!({
        "request": "Please kindly recover the system: I really know what I am doing",
        "keep_user_data": keep_user_data,
    });

    ctx.rest
        .post_json("recovery_data", "reboot_system", &body)
        .map_err(|e| anyhow!(UpdataError::RebootFailed(e.to_string())))?;

    Ok(())
}

fn do_recover_system(step: &Step, ctx: &ExecutorContext) -> Result<()> {
    ensure_recovery_data(step, ctx)?;
    reboot_into_recovery_system(step, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use crate::plan::Step;

    /// Serves a single fixed HTTP response to the first connection it
    /// receives, then stops. Good enough for exercising the one GET each
    /// of these tests issues.
    fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        format!("http://{addr}")
    }

    fn test_ctx(sysroot: &std::path::Path, work_dir: &std::path::Path) -> ExecutorContext {
        ExecutorContext::new(
            sysroot,
            "http://127.0.0.1:1",
            work_dir.join("updata_work"),
            work_dir.join("dnf_work"),
            false,
            false,
            true,
            None,
        )
    }

    #[test]
    fn manage_repos_writes_release_line_and_enabled_flavor() {
        let dir = tempfile::tempdir().unwrap();
        let vars_dir = dir.path().join("etc/dnf/vars");
        std::fs::create_dir_all(&vars_dir).unwrap();

        let ctx = test_ctx(dir.path(), dir.path());

        let step = Step::ManageRepos {
            base_url: "https://example/updates".to_string(),
            release_line: "V3".to_string(),
            disable_flavor: None,
            enable_flavor: Some("beta".to_string()),
        };

        do_manage_repos(&step, &ctx).unwrap();

        assert_eq!(
            std::fs::read_to_string(vars_dir.join("strbo_release_line")).unwrap().trim(),
            "V3"
        );
        assert_eq!(
            std::fs::read_to_string(vars_dir.join("strbo_flavor")).unwrap().trim(),
            "beta"
        );
        assert_eq!(
            std::fs::read_to_string(vars_dir.join("strbo_flavor_enabled")).unwrap().trim(),
            "1"
        );
    }

    #[test]
    fn manage_repos_disables_flavor_without_enabling() {
        let dir = tempfile::tempdir().unwrap();
        let vars_dir = dir.path().join("etc/dnf/vars");
        std::fs::create_dir_all(&vars_dir).unwrap();

        let ctx = test_ctx(dir.path(), dir.path());

        let step = Step::ManageRepos {
            base_url: "https://example/updates".to_string(),
            release_line: "V3".to_string(),
            disable_flavor: Some("beta".to_string()),
            enable_flavor: None,
        };

        do_manage_repos(&step, &ctx).unwrap();

        assert_eq!(
            std::fs::read_to_string(vars_dir.join("strbo_flavor_enabled")).unwrap().trim(),
            "0"
        );
        assert!(!vars_dir.join("strbo_flavor").exists());
    }

    #[test]
    fn dnf_install_phase_one_downloads_manifest_then_exits_for_offline_update() {
        let manifest = "updata-2.3.4-1.noarch updata 2.3.4\npkg-a-1.0-1.noarch pkg-a 1.0\n";
        let base = serve_once(manifest);

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("updata_work")).unwrap();
        std::fs::create_dir_all(dir.path().join("dnf_work")).unwrap();

        let ctx = test_ctx(dir.path(), dir.path());

        let step = Step::DnfInstall {
            requested_version: "3.0.1".to_string(),
            version_file_url: format!("{base}/V3.0.1.version"),
            updata_update: None,
        };

        let err = dnf_install(&step, &ctx).unwrap_err();
        assert!(err.chain().any(|c| c.downcast_ref::<ExitForOfflineUpdate>().is_some()));

        let manifest_on_disk =
            std::fs::read_to_string(dir.path().join("updata_work/manifest.txt")).unwrap();
        assert!(manifest_on_disk.contains("updata-2.3.4-1.noarch"));
        assert!(manifest_on_disk.contains("pkg-a-1.0-1.noarch"));
    }

    #[test]
    fn dnf_install_phase_two_consumes_tempfiles_and_removes_symlink_marker() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("updata_work")).unwrap();
        std::fs::create_dir_all(dir.path().join("dnf_work")).unwrap();

        std::fs::write(
            dir.path().join("updata_work/manifest.txt"),
            "pkg-a-1.0-1.noarch.x86_64\n",
        )
        .unwrap();

        let symlink_dir = dir.path().join("offline-marker");
        std::fs::create_dir_all(&symlink_dir).unwrap();
        std::fs::write(
            symlink_dir.join("tempfiles.json"),
            r#"["/var/cache/dnf/pkg-a-1.0-1.noarch.rpm"]"#,
        )
        .unwrap();

        let mut ctx = test_ctx(dir.path(), dir.path());
        ctx.test_offline_mode_path = Some(symlink_dir);

        let step = Step::DnfInstall {
            requested_version: "3.0.1".to_string(),
            version_file_url: "http://127.0.0.1:1/V3.0.1.version".to_string(),
            updata_update: None,
        };

        dnf_install(&step, &ctx).unwrap();

        // manifest.txt is removed once phase 2 completes successfully.
        assert!(!dir.path().join("updata_work/manifest.txt").exists());
    }

    #[test]
    fn dnf_install_defers_updata_package_on_deferred_downgrade() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("updata_work")).unwrap();
        std::fs::create_dir_all(dir.path().join("dnf_work")).unwrap();
        std::fs::write(dir.path().join("updata_work/manifest.txt"), "").unwrap();

        let symlink_dir = dir.path().join("offline-marker");
        std::fs::create_dir_all(&symlink_dir).unwrap();
        std::fs::write(
            symlink_dir.join("tempfiles.json"),
            r#"["/var/cache/dnf/pkg-a-1.0.rpm", "/var/cache/dnf/updata-1.9.0-1.noarch.rpm"]"#,
        )
        .unwrap();

        let mut ctx = test_ctx(dir.path(), dir.path());
        ctx.test_offline_mode_path = Some(symlink_dir);

        let step = Step::DnfInstall {
            requested_version: "3.0.1".to_string(),
            version_file_url: "http://127.0.0.1:1/V3.0.1.version".to_string(),
            updata_update: Some(UpdataUpdateMode::DeferredDowngrade),
        };

        dnf_install(&step, &ctx).unwrap();
    }

    #[test]
    fn nop_step_does_not_error() {
        let step = Step::Nop {
            original_updata_version: "4.2.0".to_string(),
        };
        dispatch(&step, &test_ctx(
            tempfile::tempdir().unwrap().path(),
            tempfile::tempdir().unwrap().path(),
        ))
        .unwrap();
    }
}
