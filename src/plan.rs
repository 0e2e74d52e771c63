//! The plan data model: a closed tagged union of steps, serialized to and
//! from the JSON plan file that is the only state carried between the
//! planner and the executor (and across the reboot inside `dnf-install`).

use serde::{Deserialize, Serialize};

/// One step of an upgrade plan. `action` is the JSON tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Step {
    /// Leading informational marker: which UpdaTA version computed this
    /// plan.
    Nop { original_updata_version: String },

    /// Reconfigures which package repository (release line, flavor) the
    /// package manager pulls from.
    ManageRepos {
        base_url: String,
        release_line: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        disable_flavor: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        enable_flavor: Option<String>,
    },

    /// Installs a specific main-system version through the package
    /// manager, two-phase across a reboot.
    DnfInstall {
        requested_version: String,
        version_file_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        updata_update: Option<UpdataUpdateMode>,
    },

    /// Synchronizes installed packages with the configured repository
    /// without changing the target version.
    DnfDistroSync {},

    /// Reboots the appliance via the system-reboot mechanism.
    RebootSystem {},

    /// Replaces the recovery system with a new image, then verifies it.
    RunInstaller {
        requested_line: String,
        requested_version: String,
        requested_flavor: String,
        installer_url: String,
    },

    /// Replaces recovery data (if needed) and reboots into the recovery
    /// system to flash the main system.
    RecoverSystem {
        requested_line: String,
        requested_version: String,
        requested_flavor: String,
        keep_user_data: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        recovery_data_url: Option<String>,
    },
}

impl Step {
    /// The `action` discriminator, as it appears in the plan JSON and in
    /// log lines (`"{action}: {message}"`).
    pub fn action(&self) -> &'static str {
        match self {
            Step::Nop { .. } => "nop",
            Step::ManageRepos { .. } => "manage-repos",
            Step::DnfInstall { .. } => "dnf-install",
            Step::DnfDistroSync {} => "dnf-distro-sync",
            Step::RebootSystem {} => "reboot-system",
            Step::RunInstaller { .. } => "run-installer",
            Step::RecoverSystem { .. } => "recover-system",
        }
    }
}

/// How the executor should handle UpdaTA's own package across a
/// `dnf-install`, when the target manifest implies the running updater
/// would otherwise remove or downgrade itself mid-install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdataUpdateMode {
    DeferredDowngrade,
    DeferredRemoval,
}

pub type Plan = Vec<Step>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manage_repos_round_trips_through_json() {
        let step = Step::ManageRepos {
            base_url: "https://example/updates".to_string(),
            release_line: "V3".to_string(),
            disable_flavor: Some("beta".to_string()),
            enable_flavor: None,
        };

        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains("\"action\":\"manage-repos\""));
        assert!(!json.contains("enable_flavor"));

        let back: Step = serde_json::from_str(&json).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn dnf_install_tags_updata_update_mode() {
        let step = Step::DnfInstall {
            requested_version: "3.0.4".to_string(),
            version_file_url: "https://example/V3.0.4.version".to_string(),
            updata_update: Some(UpdataUpdateMode::DeferredDowngrade),
        };

        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains("\"updata_update\":\"deferred_downgrade\""));
    }

    #[test]
    fn plan_is_an_ordered_array_of_tagged_steps() {
        let plan: Plan = vec![
            Step::Nop {
                original_updata_version: "4.2.0".to_string(),
            },
            Step::RebootSystem {},
        ];

        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }
}
