//! Strategy computation: builds an ordered [`Plan`](crate::plan::Step) from
//! current on-disk state, CLI-equivalent configuration, and remote
//! artifacts.

use std::path::PathBuf;

use anyhow::Result;

use crate::artifacts;
use crate::compatibility;
use crate::error::UpdataError;
use crate::logging::log;
use crate::plan::{Step, UpdataUpdateMode};
use crate::repo::{MainSystem, PackageManagerVariables, RecoverySystem, VersionInfo};
use crate::version::VersionNumber;

/// Everything the planner needs to know about what the user asked for and
/// where to look for current state — the Rust analogue of the planner's
/// `argparse` namespace.
pub struct PlannerConfig {
    pub base_url: String,
    pub target_version: Option<VersionNumber>,
    pub target_release_line: Option<String>,
    pub target_flavor: Option<String>,
    pub force_image_files: bool,
    pub force_rsys_update: bool,
    pub keep_user_data: bool,
    pub machine_name: String,
    pub test_sysroot: PathBuf,
    pub this_updata_version: String,
    pub test_mode: bool,
}

/// Computes the full upgrade plan. Returns `UpdataError::MainVersionUnreadable`
/// / `RecoveryVersionUnreadable` when the corresponding system version
/// cannot be determined at all — the caller (the planner binary) maps
/// those to exit codes 23/24.
pub fn build_plan(config: &PlannerConfig) -> Result<Vec<Step>> {
    let main_sys = MainSystem::new(config.test_sysroot.join("etc"));
    let main_version = main_sys
        .get_system_version()
        .ok_or(UpdataError::MainVersionUnreadable)?;

    let target_release_line = config
        .target_release_line
        .clone()
        .unwrap_or_else(|| main_version.release_line().to_string());

    let mut plan = vec![Step::Nop {
        original_updata_version: config.this_updata_version.clone(),
    }];

    if target_release_line == main_version.release_line() && !config.force_image_files {
        compute_package_manager_strategy(&mut plan, config, &main_version, &target_release_line)?;
    } else {
        compute_recovery_strategy(&mut plan, config, &main_version, &target_release_line)?;
    }

    Ok(plan)
}

fn compute_package_manager_strategy(
    plan: &mut Vec<Step>,
    config: &PlannerConfig,
    main_version: &VersionInfo,
    target_release_line: &str,
) -> Result<()> {
    let dnf_vars = PackageManagerVariables::new(config.test_sysroot.join("etc/dnf/vars"));

    let (repo_step, target_flavor, flavor_was_changed) = handle_repo_changes(
        &config.base_url,
        target_release_line,
        main_version.flavor(),
        config.target_flavor.as_deref(),
        &dnf_vars,
    );
    plan.push(repo_step);

    let repo_url = format!("{}/{target_release_line}", config.base_url);
    let version_step = handle_version_change(
        main_version.version_number(),
        &config.this_updata_version,
        config.target_version.as_ref(),
        flavor_was_changed,
        &repo_url,
        &target_flavor,
    )?;
    if let Some(step) = version_step {
        plan.push(step);
    }

    // `manage-repos` above is unconditional, so a reboot is always
    // scheduled after the package-manager path.
    log("Planning system reboot");
    plan.push(Step::RebootSystem {});

    Ok(())
}

fn handle_repo_changes(
    base_url: &str,
    release_line: &str,
    current_flavor: Option<&str>,
    requested_flavor: Option<&str>,
    dnf_vars: &PackageManagerVariables,
) -> (Step, String, bool) {
    let mut target_flavor = requested_flavor
        .map(str::to_string)
        .unwrap_or_else(|| current_flavor.unwrap_or("").to_string());

    if target_flavor == "stable" {
        target_flavor = String::new();
    }

    let flavor_was_changed = target_flavor != current_flavor.unwrap_or("");

    let configured_flavor = dnf_vars.read_var("strbo_flavor");

    let disable_flavor = configured_flavor
        .as_ref()
        .filter(|c| !c.is_empty() && *c != &target_flavor)
        .cloned();

    let enable_flavor = if !target_flavor.is_empty()
        && configured_flavor.as_deref() != Some(target_flavor.as_str())
    {
        Some(target_flavor.clone())
    } else {
        None
    };

    let step = Step::ManageRepos {
        base_url: base_url.to_string(),
        release_line: release_line.to_string(),
        disable_flavor,
        enable_flavor,
    };

    (step, target_flavor, flavor_was_changed)
}

fn handle_version_change(
    current_version: Option<&VersionNumber>,
    this_updata_version: &str,
    requested_target_version: Option<&VersionNumber>,
    force_version_check: bool,
    repo_url: &str,
    target_flavor: &str,
) -> Result<Option<Step>> {
    let effective_flavor = if target_flavor.is_empty() {
        "stable"
    } else {
        target_flavor
    };

    let (target_version, target_version_pinned_on_server) = match requested_target_version {
        Some(v) => (*v, false),
        None => {
            let latest = artifacts::read_latest(
                &format!("{repo_url}/{effective_flavor}/versions/latest.txt"),
                "latest.txt (packages)",
            )?;
            match latest {
                Some(v) => (v, true),
                None => return Ok(None),
            }
        }
    };

    if current_version == Some(&target_version) && !force_version_check {
        log(&format!(
            "System update to {target_version} avoided, version already installed"
        ));
        return Ok(None);
    }

    log(&format!(
        "Planning update to {} version {target_version}, flavor {effective_flavor}",
        if target_version_pinned_on_server {
            "pinned"
        } else {
            "requested"
        }
    ));

    let version_file_url =
        format!("{repo_url}/{effective_flavor}/versions/V{target_version}.version");

    let next_version = artifacts::find_updata_version(&version_file_url)?;
    let cmp = version_compare(next_version.as_deref(), Some(this_updata_version))?;

    let updata_update = if cmp < 0 {
        match &next_version {
            None => {
                log("UpdaTA is going to be REMOVED");
                Some(UpdataUpdateMode::DeferredRemoval)
            }
            Some(next) => {
                log(&format!(
                    "UpdaTA is going to be DOWNGRADED from {this_updata_version} to {next}"
                ));
                Some(UpdataUpdateMode::DeferredDowngrade)
            }
        }
    } else {
        log(&format!(
            "Target version of UpdaTA is {} ({})",
            next_version.as_deref().unwrap_or("none"),
            if cmp == 0 { "unchanged" } else { "regular upgrade" }
        ));
        None
    };

    Ok(Some(Step::DnfInstall {
        requested_version: target_version.to_string(),
        version_file_url,
        updata_update,
    }))
}

/// Loose dotted-integer lexicographic compare, mirroring
/// `_version_compare`. A non-numeric component is a parse error propagated
/// to the caller, exactly as the original's unguarded `int(a), int(b)`
/// raises an uncaught `ValueError` that crashes the whole planner run —
/// UpdaTA package versions are untrusted remote input, but malformed ones
/// are fatal, not silently "the oldest possible version".
fn version_compare(version_a: Option<&str>, version_b: Option<&str>) -> Result<i32> {
    let (a, b) = match (version_a, version_b) {
        (None, None) => return Ok(0),
        (None, Some(_)) => return Ok(-1),
        (Some(_), None) => return Ok(1),
        (Some(a), Some(b)) => (a, b),
    };

    let parse_parts = |s: &str| -> Result<Vec<i64>> {
        s.split('.')
            .map(|p| {
                p.parse::<i64>().map_err(|_| {
                    UpdataError::ParseError {
                        what: "UpdaTA package version".to_string(),
                        message: format!("invalid literal for int() with base 10: '{p}'"),
                    }
                    .into()
                })
            })
            .collect()
    };

    let a_parts = parse_parts(a)?;
    let b_parts = parse_parts(b)?;

    for (x, y) in a_parts.iter().zip(b_parts.iter()) {
        if x < y {
            return Ok(-1);
        }
        if x > y {
            return Ok(1);
        }
    }

    Ok(a_parts.len() as i32 - b_parts.len() as i32)
}

fn determine_recovery_target_version(
    config: &PlannerConfig,
    default_flavor: Option<&str>,
    target_release_line: &str,
) -> Result<(VersionNumber, String)> {
    let mut target_flavor = config
        .target_flavor
        .clone()
        .unwrap_or_else(|| default_flavor.unwrap_or("").to_string());

    if target_flavor.is_empty() {
        target_flavor = "stable".to_string();
    }

    let target_version = match &config.target_version {
        Some(v) => Some(*v),
        None => artifacts::read_latest(
            &format!(
                "{}/{target_release_line}/{target_flavor}/recovery-data.{}/latest.txt",
                config.base_url, config.machine_name
            ),
            "latest.txt (recovery data)",
        )?,
    };

    let target_version =
        target_version.ok_or_else(|| anyhow::anyhow!("No target version specified"))?;

    Ok((target_version, target_flavor))
}

fn compute_recovery_strategy(
    plan: &mut Vec<Step>,
    config: &PlannerConfig,
    main_version: &VersionInfo,
    target_release_line: &str,
) -> Result<()> {
    let (target_version, target_flavor) =
        determine_recovery_target_version(config, main_version.flavor(), target_release_line)?;

    let recovery_sys = RecoverySystem::new(
        config.test_sysroot.join("bootpartr"),
        config.test_sysroot.join("src"),
    );

    let recovery_version = recovery_sys
        .get_system_version()
        .ok_or(UpdataError::RecoveryVersionUnreadable)?;
    let rsys_version = recovery_version
        .version_number()
        .ok_or(UpdataError::RecoveryVersionUnreadable)?;

    let compat_doc = compatibility::read_recovery_compatibility_file(
        &config.base_url,
        target_release_line,
        &config.machine_name,
    )?
    .ok_or_else(|| UpdataError::MissingCompatibilityDocument {
        target: target_version.to_string(),
    })?;

    if let Some(upgrade) = compatibility::ensure_recovery_system_compatibility(
        &compat_doc,
        rsys_version,
        target_release_line,
        &target_version,
        &target_flavor,
        &config.base_url,
        &config.machine_name,
        config.force_rsys_update,
    )? {
        plan.push(Step::RunInstaller {
            requested_line: upgrade.requested_line,
            requested_version: upgrade.requested_version,
            requested_flavor: upgrade.requested_flavor,
            installer_url: upgrade.installer_url,
        });
    }

    let data_version = recovery_sys.get_data_version(config.test_mode)?;

    let recovery_data_url = match &data_version {
        Some(dv) if dv.version_number() == Some(&target_version) => {
            log(&format!(
                "Update of recovery images for version {target_version} avoided, images already installed"
            ));
            None
        }
        _ => {
            log(&format!(
                "Planning download of recovery images for version {target_version}, flavor {target_flavor}"
            ));
            let url = format!(
                "{}/{target_release_line}/{target_flavor}/recovery-data.{}/strbo-update-V{target_version}.bin",
                config.base_url, config.machine_name
            );
            artifacts::ensure_url_exists(&url)?;
            Some(url)
        }
    };

    log(&format!(
        "Planning recovery to version {target_version}, flavor {target_flavor}, {} user data",
        if config.keep_user_data {
            "keeping"
        } else {
            "erasing"
        }
    ));

    plan.push(Step::RecoverSystem {
        requested_line: target_release_line.to_string(),
        requested_version: target_version.to_string(),
        requested_flavor: target_flavor,
        keep_user_data: config.keep_user_data,
        recovery_data_url,
    });

    Ok(())
}
