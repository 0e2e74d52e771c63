//! On-disk and mounted-partition version discovery, and the flat
//! single-value-per-file variable store the package manager reads its
//! repo/flavor configuration from.
//!
//! `MainSystem`, `RecoverySystem` and `PackageManagerVariables`, plus the
//! two release-file parsers they both build on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::exec::subprocess::{self, RunOptions};
use crate::logging::errormsg;
use crate::version::VersionNumber;

/// Tokenizes `raw` the way a POSIX shell would (quoting, escapes) and splits
/// each token on its first `=` into a key/value pair. Returns `None` if the
/// file could not be read or a token was not a `KEY=VALUE` assignment —
/// callers treat `None` as "absent", the error having already been logged.
fn parse_shell_style_file(path: &Path) -> Option<HashMap<String, String>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            errormsg(&format!("error reading file {}: {e}", path.display()));
            return None;
        }
    };

    if raw.is_empty() {
        return Some(HashMap::new());
    }

    let tokens = match shlex::split(&raw) {
        Some(tokens) => tokens,
        None => {
            errormsg(&format!("error reading file {}: unterminated quoting", path.display()));
            return None;
        }
    };

    let mut values = HashMap::new();
    for token in tokens {
        match token.split_once('=') {
            Some((key, value)) => {
                if !key.is_empty() {
                    values.insert(key.to_string(), value.to_string());
                }
            }
            None => {
                errormsg(&format!(
                    "error reading file {}: \"{token}\" is not a KEY=VALUE assignment",
                    path.display()
                ));
                return None;
            }
        }
    }

    Some(values)
}

/// Parses plain `KEY=VALUE` lines, no shell quoting — used for `os-release`.
fn parse_simple_assignments_file(path: &Path) -> Option<HashMap<String, String>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            errormsg(&format!("error reading file {}: {e}", path.display()));
            return None;
        }
    };

    let mut values = HashMap::new();
    for line in raw.lines() {
        match line.split_once('=') {
            Some((key, value)) => {
                let key = key.trim();
                if !key.is_empty() {
                    values.insert(key.to_string(), value.trim().to_string());
                }
            }
            None => {
                errormsg(&format!(
                    "error reading file {}: \"{line}\" is not a KEY=VALUE assignment",
                    path.display()
                ));
                return None;
            }
        }
    }

    Some(values)
}

fn required<'a>(values: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    values
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing field {key}"))
}

/// The installed version of either the main system or the recovery system,
/// as read from a release file.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    version_number: Option<VersionNumber>,
    release_line: String,
    flavor: Option<String>,
    time_stamp: Option<String>,
    commit_id: Option<String>,
}

impl VersionInfo {
    pub fn version_number(&self) -> Option<&VersionNumber> {
        self.version_number.as_ref()
    }

    pub fn release_line(&self) -> &str {
        &self.release_line
    }

    pub fn flavor(&self) -> Option<&str> {
        self.flavor.as_deref()
    }

    pub fn time_stamp(&self) -> Option<&str> {
        self.time_stamp.as_deref()
    }

    pub fn commit_id(&self) -> Option<&str> {
        self.commit_id.as_deref()
    }

    fn from_strbo_release(values: &HashMap<String, String>) -> Result<VersionInfo> {
        Ok(VersionInfo {
            version_number: Some(VersionNumber::from_string(
                required(values, "STRBO_VERSION")?,
                false,
            )?),
            release_line: required(values, "STRBO_RELEASE_LINE")?.to_string(),
            flavor: Some(required(values, "STRBO_FLAVOR")?.to_string()),
            time_stamp: Some(required(values, "STRBO_DATETIME")?.to_string()),
            commit_id: Some(required(values, "STRBO_GIT_COMMIT")?.to_string()),
        })
    }

    fn from_os_release(values: &HashMap<String, String>) -> Result<VersionInfo> {
        Ok(VersionInfo {
            version_number: Some(VersionNumber::from_string(
                required(values, "VERSION_ID")?,
                false,
            )?),
            release_line: "V1".to_string(),
            flavor: None,
            time_stamp: Some(required(values, "BUILD_ID")?.to_string()),
            commit_id: Some(required(values, "BUILD_GIT_COMMIT")?.to_string()),
        })
    }

    /// Sentinel for "recovery system predates the release-file convention":
    /// neither `strbo-release` nor `os-release` is present on its boot
    /// partition.
    fn legacy_recovery_sentinel() -> VersionInfo {
        VersionInfo {
            version_number: None,
            release_line: "V1".to_string(),
            flavor: None,
            time_stamp: None,
            commit_id: None,
        }
    }
}

/// Reads the main system's installed version from `/etc`.
pub struct MainSystem {
    etc_path: PathBuf,
}

impl MainSystem {
    pub fn new(etc_path: impl Into<PathBuf>) -> Self {
        MainSystem {
            etc_path: etc_path.into(),
        }
    }

    /// Tries `strbo-release` first, falling back to `os-release`. Returns
    /// `None` if both are absent, or if a present file fails to parse into
    /// a `VersionInfo` (a malformed file is not retried against the other
    /// one — see `strbo_repo.MainSystem.get_system_version`).
    pub fn get_system_version(&self) -> Option<VersionInfo> {
        let sr = self.etc_path.join("strbo-release");
        if let Some(values) = parse_shell_style_file(&sr) {
            return match VersionInfo::from_strbo_release(&values) {
                Ok(info) => Some(info),
                Err(e) => {
                    errormsg(&format!(
                        "failed obtaining main system version from {}: {e}",
                        sr.display()
                    ));
                    None
                }
            };
        }

        let sr = self.etc_path.join("os-release");
        match parse_simple_assignments_file(&sr) {
            Some(values) => match VersionInfo::from_os_release(&values) {
                Ok(info) => Some(info),
                Err(e) => {
                    errormsg(&format!(
                        "failed obtaining main system version from {}: {e}",
                        sr.display()
                    ));
                    None
                }
            },
            None => None,
        }
    }
}

/// The recovery system living on the appliance's second boot partition, and
/// its associated (not necessarily mounted) recovery-data partition.
pub struct RecoverySystem {
    pub system_mountpoint: PathBuf,
    pub data_mountpoint: PathBuf,
    pub data_mountpoint_mounted: bool,
    sudo_required: bool,
}

impl RecoverySystem {
    pub fn new(system_mountpoint: impl Into<PathBuf>, data_mountpoint: impl Into<PathBuf>) -> Self {
        RecoverySystem {
            system_mountpoint: system_mountpoint.into(),
            data_mountpoint: data_mountpoint.into(),
            data_mountpoint_mounted: false,
            sudo_required: true,
        }
    }

    /// Same two-file fallback as `MainSystem`, but with a further fallback
    /// to a legacy sentinel `VersionInfo` when both files are genuinely
    /// absent — a pre-existing recovery system installed before release
    /// files were introduced is not an error.
    pub fn get_system_version(&self) -> Option<VersionInfo> {
        let sr = self.system_mountpoint.join("strbo-release");
        if let Some(values) = parse_shell_style_file(&sr) {
            return match VersionInfo::from_strbo_release(&values) {
                Ok(info) => Some(info),
                Err(e) => {
                    errormsg(&format!(
                        "failed obtaining recovery system version from {}: {e}",
                        sr.display()
                    ));
                    None
                }
            };
        }

        let sr = self.system_mountpoint.join("os-release");
        if let Some(values) = parse_simple_assignments_file(&sr) {
            return match VersionInfo::from_os_release(&values) {
                Ok(info) => Some(info),
                Err(e) => {
                    errormsg(&format!(
                        "failed obtaining recovery system version from {}: {e}",
                        sr.display()
                    ));
                    None
                }
            };
        }

        Some(VersionInfo::legacy_recovery_sentinel())
    }

    fn mount_command(&self, tool: &str) -> (String, Vec<String>) {
        let mountpoint = self.data_mountpoint.display().to_string();
        if self.sudo_required {
            ("sudo".to_string(), vec![tool.to_string(), mountpoint])
        } else {
            (tool.to_string(), vec![mountpoint])
        }
    }

    /// Acquires a scoped mount of the recovery data partition (unless it is
    /// already mounted), reads its release file, and releases the mount on
    /// every exit path.
    pub fn get_data_version(&self, test_mode: bool) -> Result<Option<VersionInfo>> {
        let sr = self.data_mountpoint.join("images/strbo-release");
        let mut mounted_by_us = false;

        if !self.data_mountpoint_mounted {
            let (program, args) = self.mount_command("/bin/mount");
            let opts = RunOptions {
                test_mode,
                ..Default::default()
            };
            if let Err(e) = subprocess::run_command(&program, &args, &opts) {
                errormsg(&format!(
                    "failed obtaining recovery data version from {}: {e}",
                    sr.display()
                ));
                return Ok(None);
            }
            mounted_by_us = true;
        }

        let result = match parse_shell_style_file(&sr) {
            Some(values) => match VersionInfo::from_strbo_release(&values) {
                Ok(info) => Some(info),
                Err(e) => {
                    errormsg(&format!(
                        "failed obtaining recovery data version from {}: {e}",
                        sr.display()
                    ));
                    None
                }
            },
            None => None,
        };

        if mounted_by_us {
            let (program, args) = self.mount_command("/bin/umount");
            let opts = RunOptions {
                test_mode,
                ..Default::default()
            };
            subprocess::run_command(&program, &args, &opts).with_context(|| {
                format!("failed to unmount {}", self.data_mountpoint.display())
            })?;
        }

        Ok(result)
    }
}

/// A flat directory of single-value text files, one per package-manager
/// variable.
pub struct PackageManagerVariables {
    path_to_vars: PathBuf,
}

impl PackageManagerVariables {
    pub fn new(path_to_vars: impl Into<PathBuf>) -> Self {
        PackageManagerVariables {
            path_to_vars: path_to_vars.into(),
        }
    }

    /// Writes `value` to the file named `var_name`, creating it. No-op
    /// (returns `false`) if either `var_name` or `value` is empty. A
    /// successful write invokes `on_write(var_name, value)` first.
    pub fn write_var(
        &self,
        var_name: &str,
        value: &str,
        on_write: Option<&mut dyn FnMut(&str, &str)>,
    ) -> Result<bool> {
        if var_name.is_empty() || value.is_empty() {
            return Ok(false);
        }

        if let Some(f) = on_write {
            f(var_name, value);
        }

        std::fs::write(self.path_to_vars.join(var_name), format!("{value}\n"))
            .with_context(|| format!("writing package manager variable {var_name}"))?;

        Ok(true)
    }

    /// Reads and trims the content of `var_name`. Missing files and
    /// permission errors are logged and surfaced as `None`.
    pub fn read_var(&self, var_name: &str) -> Option<String> {
        if var_name.is_empty() {
            return None;
        }

        let path = self.path_to_vars.join(var_name);
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                errormsg(&format!("package manager variable {} not found", path.display()));
                None
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                errormsg(&format!(
                    "no permission to read package manager variable {}",
                    path.display()
                ));
                None
            }
            Err(e) => {
                errormsg(&format!(
                    "failed reading package manager variable {}: {e}",
                    path.display()
                ));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn main_system_reads_strbo_release() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "strbo-release",
            "STRBO_VERSION=3.1.2\nSTRBO_RELEASE_LINE=V3\nSTRBO_FLAVOR=\nSTRBO_DATETIME=2024-01-01\nSTRBO_GIT_COMMIT=abc123\n",
        );

        let main = MainSystem::new(dir.path());
        let info = main.get_system_version().unwrap();
        assert_eq!(info.version_number().unwrap().to_string(), "3.1.2");
        assert_eq!(info.release_line(), "V3");
        assert_eq!(info.flavor(), Some(""));
    }

    #[test]
    fn main_system_falls_back_to_os_release() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "os-release",
            "VERSION_ID=1.0.0\nBUILD_ID=2024-01-01\nBUILD_GIT_COMMIT=deadbeef\n",
        );

        let main = MainSystem::new(dir.path());
        let info = main.get_system_version().unwrap();
        assert_eq!(info.version_number().unwrap().to_string(), "1.0.0");
        assert_eq!(info.release_line(), "V1");
        assert_eq!(info.flavor(), None);
    }

    #[test]
    fn main_system_returns_none_when_both_files_absent() {
        let dir = tempfile::tempdir().unwrap();
        let main = MainSystem::new(dir.path());
        assert!(main.get_system_version().is_none());
    }

    #[test]
    fn recovery_system_falls_back_to_legacy_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let recovery = RecoverySystem::new(dir.path(), dir.path().join("data"));
        let info = recovery.get_system_version().unwrap();
        assert!(info.version_number().is_none());
        assert_eq!(info.release_line(), "V1");
    }

    #[test]
    fn package_manager_variables_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let vars = PackageManagerVariables::new(dir.path());
        assert!(vars.write_var("strbo_flavor", "beta", None).unwrap());
        assert_eq!(vars.read_var("strbo_flavor"), Some("beta".to_string()));
    }

    #[test]
    fn package_manager_variables_skip_empty_writes() {
        let dir = tempfile::tempdir().unwrap();
        let vars = PackageManagerVariables::new(dir.path());
        assert!(!vars.write_var("strbo_flavor", "", None).unwrap());
        assert_eq!(vars.read_var("strbo_flavor"), None);
    }
}
