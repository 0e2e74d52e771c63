//! Default filesystem locations used by the planner and executor.

use std::path::Path;

use anyhow::{Context, Result};

/// Default `/etc`-like directory holding `strbo-release`/`os-release` for
/// the main system.
pub const MAIN_SYSTEM_ETC: &str = "/etc";

/// Recovery system's boot partition mountpoint.
pub const RECOVERY_SYSTEM_MOUNTPOINT: &str = "/bootpartr";

/// Recovery data partition mountpoint (not mounted by default).
pub const RECOVERY_DATA_MOUNTPOINT: &str = "/src";

/// Default REST API base URL the executor talks to.
pub const DEFAULT_REST_API_URL: &str = "http://localhost:8467/v1";

/// Default working directory for downloaded manifests/packages.
pub const DEFAULT_UPDATA_WORK_DIR: &str = "/var/local/data/system_update_data";

/// Default working directory `dnf` itself uses for its package cache.
pub const DEFAULT_DNF_WORK_DIR: &str = "/var/local/data/dnf";

/// Sentinel symlink marking "phase 1 download complete, awaiting reboot".
pub const OFFLINE_UPDATE_SYMLINK: &str = "/system-update";

/// Size-capped rotating log file.
pub const LOG_FILE_PATH: &str = "/var/local/data/updata/logs";

/// Unprivileged account the planner/executor drop privileges to outside of
/// test mode.
pub const RUN_AS_USER: &str = "updata";

/// Default machine name used to build the recovery-data manifest URL.
pub const DEFAULT_MACHINE_NAME: &str = "raspberrypi";

pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}
