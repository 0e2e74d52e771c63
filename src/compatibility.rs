//! Recovery-system compatibility resolution.
//!
//! Each major release line publishes a `strbo-recovery-compatibility.json`
//! naming, for every recovery system revision it knows about, the
//! main-system version ranges that revision supports. Upgrading or
//! downgrading the main system may therefore require replacing the
//! recovery system first.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::UpdataError;
use crate::logging;
use crate::version::{VersionNumber, VersionRange};

/// The parsed contents of a `strbo-recovery-compatibility.json` file.
#[derive(Debug, Clone, Deserialize)]
pub struct CompatibilityDocument {
    /// Recovery system revision name (e.g. `"3-r1"`) to the list of
    /// main-system version range patterns it is compatible with.
    pub compatibility: HashMap<String, Vec<String>>,
    /// Revisions ordered from least to most preferred; the last entry that
    /// is still a candidate wins ties.
    pub rank: Vec<String>,
}

/// A pending recovery-system replacement, to be turned into a
/// `run-installer` plan step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverySystemUpgrade {
    pub requested_line: String,
    pub requested_version: String,
    pub requested_flavor: String,
    pub installer_url: String,
}

/// Downloads the compatibility document for `target_release_line` from the
/// update server. A 404 or any other non-200 response is logged and
/// reported as `Ok(None)` rather than an error — the caller decides whether
/// a missing document is fatal.
pub fn read_recovery_compatibility_file(
    base_url: &str,
    target_release_line: &str,
    machine_name: &str,
) -> Result<Option<CompatibilityDocument>> {
    let url = format!(
        "{base_url}/{target_release_line}/recovery-system.{machine_name}/strbo-recovery-compatibility.json"
    );

    let response = reqwest::blocking::get(&url).with_context(|| format!("requesting {url}"))?;

    match response.status() {
        reqwest::StatusCode::OK => Ok(Some(
            response
                .json()
                .with_context(|| format!("parsing compatibility document from {url}"))?,
        )),
        reqwest::StatusCode::NOT_FOUND => {
            logging::errormsg("File strbo-recovery-compatibility.json not found on server");
            Ok(None)
        }
        status => {
            logging::errormsg(&format!(
                "Failed downloading strbo-recovery-compatibility.json: {status}"
            ));
            Ok(None)
        }
    }
}

/// All recovery system revisions whose compatibility ranges cover `version`.
fn determine_compatible_rsys(
    compat: &HashMap<String, Vec<String>>,
    version: &VersionNumber,
) -> Result<HashSet<String>> {
    let mut revs = HashSet::new();

    for (rev, patterns) in compat {
        for pattern in patterns {
            let range = VersionRange::from_vrange_single(pattern)
                .with_context(|| format!("parsing compatibility range \"{pattern}\" for {rev}"))?;
            if range.contains(Some(version))? {
                revs.insert(rev.clone());
            }
        }
    }

    Ok(revs)
}

/// Makes sure the currently installed recovery system can serve
/// `target_version`, or returns a `RecoverySystemUpgrade` describing the
/// replacement that must be installed first.
///
/// Returns `Ok(None)` when the installed recovery system is already
/// compatible and `force_rsys_update` is not set. Returns an error if the
/// target version is not covered by any revision in `doc.rank`.
pub fn ensure_recovery_system_compatibility(
    doc: &CompatibilityDocument,
    rsys_version: &VersionNumber,
    target_release_line: &str,
    target_version: &VersionNumber,
    target_flavor: &str,
    base_url: &str,
    machine_name: &str,
    force_rsys_update: bool,
) -> Result<Option<RecoverySystemUpgrade>> {
    let required_revisions = determine_compatible_rsys(&doc.compatibility, target_version)?;
    logging::log(&format!(
        "Requested upgrade to {target_release_line}/{target_version} requires one of rsys versions {required_revisions:?}"
    ));

    let installed_revisions = determine_compatible_rsys(&doc.compatibility, rsys_version)?;

    if required_revisions
        .intersection(&installed_revisions)
        .next()
        .is_some()
    {
        logging::log(&format!(
            "Installed recovery system {rsys_version} is compatible with {target_version}: {}",
            if force_rsys_update {
                "update enforced"
            } else {
                "not replacing"
            }
        ));
        if !force_rsys_update {
            return Ok(None);
        }
    } else if !force_rsys_update {
        logging::log(&format!(
            "Installed recovery system {rsys_version} is incompatible with {target_version}"
        ));
    }

    let best = doc
        .rank
        .iter()
        .rev()
        .find(|rev| required_revisions.contains(*rev));

    let best = match best {
        Some(rev) => rev.clone(),
        None => {
            return Err(UpdataError::NoCompatibleRevision {
                target: target_version.to_string(),
            }
            .into())
        }
    };

    logging::log(&format!("Planning upgrade of recovery system to revision {best}"));

    Ok(Some(RecoverySystemUpgrade {
        requested_line: target_release_line.to_string(),
        requested_version: target_version.to_string(),
        requested_flavor: target_flavor.to_string(),
        installer_url: format!(
            "{base_url}/{target_release_line}/recovery-system.{machine_name}/strbo-rsysimg-{best}.bin"
        ),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(compatibility: &[(&str, &[&str])], rank: &[&str]) -> CompatibilityDocument {
        CompatibilityDocument {
            compatibility: compatibility
                .iter()
                .map(|(rev, patterns)| {
                    (
                        rev.to_string(),
                        patterns.iter().map(|p| p.to_string()).collect(),
                    )
                })
                .collect(),
            rank: rank.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn v(s: &str) -> VersionNumber {
        VersionNumber::from_string(s, false).unwrap()
    }

    #[test]
    fn compatible_installed_recovery_needs_no_upgrade() {
        let d = doc(
            &[("3-r0", &["2.*.*", "2.*.*.*", "3.*.*", "3.*.*.*"])],
            &["3-r0"],
        );
        let result = ensure_recovery_system_compatibility(
            &d,
            &v("2.9.1"),
            "V3",
            &v("3.0.0"),
            "stable",
            "https://points.to.nowhere/updates",
            "raspberrypi",
            false,
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn incompatible_installed_recovery_triggers_upgrade() {
        let d = doc(
            &[("3-r0", &["2.*.*", "2.*.*.*", "3.*.*", "3.*.*.*"])],
            &["3-r0"],
        );
        let result = ensure_recovery_system_compatibility(
            &d,
            &v("1.2.3"),
            "V3",
            &v("3.0.0"),
            "stable",
            "https://points.to.nowhere/updates",
            "raspberrypi",
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(result.requested_line, "V3");
        assert_eq!(result.requested_version, "3.0.0");
        assert_eq!(result.requested_flavor, "stable");
        assert_eq!(
            result.installer_url,
            "https://points.to.nowhere/updates/V3/recovery-system.raspberrypi/strbo-rsysimg-3-r0.bin"
        );
    }

    #[test]
    fn rank_breaks_ties_among_compatible_revisions() {
        let d = doc(
            &[
                ("3-r0", &["3.0.*", "3.0.*.*"]),
                ("3-r1", &["3.0.*", "3.0.*.*"]),
                ("3-r2", &["3.1.*", "3.1.*.*", "4.*.*", "4.*.*.*"]),
            ],
            &["3-r0", "3-r1", "3-r2"],
        );

        let result = ensure_recovery_system_compatibility(
            &d,
            &v("2.7.4"),
            "V3",
            &v("3.0.0"),
            "stable",
            "https://points.to.nowhere/updates",
            "raspberrypi",
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            result.installer_url,
            "https://points.to.nowhere/updates/V3/recovery-system.raspberrypi/strbo-rsysimg-3-r1.bin"
        );

        let result = ensure_recovery_system_compatibility(
            &d,
            &v("2.7.4"),
            "V3",
            &v("3.1.0"),
            "stable",
            "https://points.to.nowhere/updates",
            "raspberrypi",
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            result.installer_url,
            "https://points.to.nowhere/updates/V3/recovery-system.raspberrypi/strbo-rsysimg-3-r2.bin"
        );
    }

    #[test]
    fn compatible_across_major_version_needs_no_upgrade() {
        let d = doc(
            &[
                ("3-r0", &["3.0.*", "3.0.*.*"]),
                ("3-r1", &["3.0.*", "3.0.*.*"]),
                ("3-r2", &["3.1.*", "3.1.*.*", "4.*.*", "4.*.*.*"]),
            ],
            &["3-r0", "3-r1", "3-r2"],
        );

        let result = ensure_recovery_system_compatibility(
            &d,
            &v("4.0.9"),
            "V3",
            &v("3.1.3"),
            "stable",
            "https://points.to.nowhere/updates",
            "raspberrypi",
            false,
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn force_update_replaces_even_when_already_compatible() {
        let d = doc(
            &[("3-r0", &["2.*.*", "2.*.*.*", "3.*.*", "3.*.*.*"])],
            &["3-r0"],
        );
        let result = ensure_recovery_system_compatibility(
            &d,
            &v("2.9.1"),
            "V3",
            &v("3.0.0"),
            "stable",
            "https://points.to.nowhere/updates",
            "raspberrypi",
            true,
        )
        .unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn no_compatible_revision_is_an_error() {
        let d = doc(&[("3-r0", &["3.*.*", "3.*.*.*"])], &["3-r0"]);
        let result = ensure_recovery_system_compatibility(
            &d,
            &v("2.9.1"),
            "V3",
            &v("9.0.0"),
            "stable",
            "https://points.to.nowhere/updates",
            "raspberrypi",
            false,
        );
        assert!(result.is_err());
    }
}
