//! Remote artifact access over plain HTTP GET/HEAD.

use anyhow::{Context, Result};
use reqwest::blocking::Client;

use crate::logging::{errormsg, log};
use crate::version::VersionNumber;

/// Fetches a `latest.txt` file: a single line giving a version string.
/// A 404 or other non-200 response, or an unparsable body, is logged and
/// reported as `Ok(None)` rather than failing the caller — callers treat a
/// missing `latest.txt` as "no opinion", not an error.
pub fn read_latest(url: &str, short_name: &str) -> Result<Option<VersionNumber>> {
    let response = reqwest::blocking::get(url).with_context(|| format!("requesting {url}"))?;

    match response.status() {
        reqwest::StatusCode::OK => {
            let text = response.text().with_context(|| format!("reading {url}"))?;
            match VersionNumber::from_string(text.trim(), false) {
                Ok(version) => Ok(Some(version)),
                Err(e) => {
                    errormsg(&format!(
                        "Failed parsing version number from {short_name}: {e}"
                    ));
                    Ok(None)
                }
            }
        }
        reqwest::StatusCode::NOT_FOUND => {
            errormsg(&format!("File {short_name} not found on server"));
            Ok(None)
        }
        status => {
            errormsg(&format!("Failed downloading {short_name}: {status}"));
            Ok(None)
        }
    }
}

/// HEAD-probes `url`, following redirects. Fails if the final response is
/// not 200 — used to confirm a recovery-data image actually exists before
/// planning to download it.
pub fn ensure_url_exists(url: &str) -> Result<()> {
    let client = Client::builder()
        .build()
        .context("building HTTP client")?;
    let response = client
        .head(url)
        .send()
        .with_context(|| format!("probing {url}"))?;

    if response.status() != reqwest::StatusCode::OK {
        anyhow::bail!("Cannot access {url}: {}", response.status());
    }

    Ok(())
}

/// One line of a `.version` manifest: NVRA, package name, package version
/// (whitespace-separated, only the first three tokens matter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub nvra: String,
    pub package_name: String,
    pub version: String,
}

/// Downloads and tokenizes a `.version` manifest. Fails on a non-200
/// response — unlike `read_latest`, a manifest is never optional once its
/// URL has been chosen.
pub fn get_manifest(url: &str) -> Result<Vec<ManifestEntry>> {
    let response = reqwest::blocking::get(url).with_context(|| format!("requesting {url}"))?;
    if response.status() != reqwest::StatusCode::OK {
        anyhow::bail!("Cannot access {url}: {}", response.status());
    }

    let body = response.text().with_context(|| format!("reading {url}"))?;
    let mut entries = Vec::new();

    for line in body.lines() {
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split_whitespace();
        if let (Some(nvra), Some(package_name), Some(version)) =
            (fields.next(), fields.next(), fields.next())
        {
            entries.push(ManifestEntry {
                nvra: nvra.to_string(),
                package_name: package_name.to_string(),
                version: version.to_string(),
            });
        }
    }

    Ok(entries)
}

/// The first whitespace-delimited token of every non-empty manifest line —
/// what `dnf install --downloadonly` is invoked with in phase 1 of
/// `dnf-install`.
pub fn manifest_package_list(url: &str) -> Result<Vec<String>> {
    let response = reqwest::blocking::get(url).with_context(|| format!("requesting {url}"))?;
    if response.status() != reqwest::StatusCode::OK {
        anyhow::bail!("Cannot access {url}: {}", response.status());
    }

    let body = response.text().with_context(|| format!("reading {url}"))?;
    Ok(body
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect())
}

/// Looks up the package version of UpdaTA itself within a target version's
/// manifest, to decide whether the running updater would be replaced,
/// downgraded, or removed by installing that manifest.
pub fn find_updata_version(manifest_url: &str) -> Result<Option<String>> {
    let entries = get_manifest(manifest_url)?;

    for entry in &entries {
        if entry.package_name == "updata" {
            return Ok(Some(entry.version.clone()));
        }
    }

    log(&format!("WARNING: UpdaTA is not listed in {manifest_url}"));
    Ok(None)
}
