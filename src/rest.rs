//! Thin client for the appliance's REST API.
//!
//! The entry point at `/` publishes a HAL-ish `_links` map from category to
//! named endpoints, and every endpoint this crate calls is looked up
//! through it rather than hardcoded.

use std::cell::RefCell;
use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::error::UpdataError;
use crate::logging::errormsg;

/// Maps a `reqwest` error from talking to the appliance into
/// `UpdataError::RestConnection` when it is a transport-level connection
/// failure (the exit-code-20 case in spec.md §6), otherwise wraps it with
/// `what` as plain context.
fn map_send_error(e: reqwest::Error, what: impl Into<String>) -> anyhow::Error {
    if e.is_connect() {
        UpdataError::RestConnection(e.to_string()).into()
    } else {
        anyhow::Error::new(e).context(what.into())
    }
}

#[derive(Debug, Deserialize)]
struct EntryPoint {
    #[serde(rename = "_links")]
    links: HashMap<String, Vec<LinkEntry>>,
}

#[derive(Debug, Deserialize)]
struct LinkEntry {
    name: String,
    href: String,
}

/// Status/version-info shape shared by `system_info` and `data_info`.
#[derive(Debug, Deserialize)]
pub struct StatusInfo {
    pub status: Status,
    pub version_info: VersionInfoPayload,
}

#[derive(Debug, Deserialize)]
pub struct Status {
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct VersionInfoPayload {
    pub number: String,
    pub release_line: String,
    pub flavor: String,
}

/// Caches the entry point document after its first fetch, exactly as
/// `Data._rest_entry_point` does (`None` until first use, then reused for
/// the lifetime of the process).
pub struct ApplianceClient {
    base_url: String,
    client: Client,
    entry_point: RefCell<Option<EntryPoint>>,
}

impl ApplianceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        ApplianceClient {
            base_url: base_url.into(),
            client: Client::new(),
            entry_point: RefCell::new(None),
        }
    }

    fn ensure_entry_point(&self) -> Result<()> {
        if self.entry_point.borrow().is_some() {
            return Ok(());
        }

        let url = format!("{}/", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| map_send_error(e, format!("requesting {url}")))?
            .error_for_status()
            .map_err(|e| map_send_error(e, format!("requesting {url}")))?;
        let entry: EntryPoint = response
            .json()
            .with_context(|| format!("parsing REST entry point from {url}"))?;

        *self.entry_point.borrow_mut() = Some(entry);
        Ok(())
    }

    /// Resolves `category`/`id` (e.g. `"recovery_data"`/`"replace_system"`)
    /// to a full URL, or `None` if the category or name is missing — logged,
    /// not an error.
    pub fn endpoint(&self, category: &str, id: &str) -> Result<Option<String>> {
        self.ensure_entry_point()?;

        let entry_point = self.entry_point.borrow();
        let entry_point = entry_point.as_ref().expect("just ensured");

        match entry_point.links.get(category) {
            Some(links) => {
                for link in links {
                    if link.name == id {
                        return Ok(Some(format!("{}{}", self.base_url, link.href)));
                    }
                }
                errormsg(&format!("API endpoint {id} in {category} not found"));
                Ok(None)
            }
            None => {
                errormsg(&format!("API endpoint {id} in {category} not found"));
                Ok(None)
            }
        }
    }

    fn required_endpoint(&self, category: &str, id: &str) -> Result<String> {
        self.endpoint(category, id)?
            .ok_or_else(|| anyhow!("API endpoint {id} in {category} not found"))
    }

    pub fn post_form(&self, category: &str, id: &str, form: &[(&str, &str)]) -> Result<()> {
        let url = self.required_endpoint(category, id)?;
        self.client
            .post(&url)
            .form(form)
            .send()
            .map_err(|e| map_send_error(e, format!("posting to {url}")))?
            .error_for_status()
            .map_err(|e| map_send_error(e, format!("posting to {url}")))?;
        Ok(())
    }

    pub fn post_json(&self, category: &str, id: &str, body: &Value) -> Result<()> {
        let url = self.required_endpoint(category, id)?;
        self.client
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| map_send_error(e, format!("posting to {url}")))?
            .error_for_status()
            .map_err(|e| map_send_error(e, format!("posting to {url}")))?;
        Ok(())
    }

    pub fn post_empty(&self, category: &str, id: &str) -> Result<()> {
        let url = self.required_endpoint(category, id)?;
        self.client
            .post(&url)
            .send()
            .map_err(|e| map_send_error(e, format!("posting to {url}")))?
            .error_for_status()
            .map_err(|e| map_send_error(e, format!("posting to {url}")))?;
        Ok(())
    }

    pub fn get_status_info(&self, category: &str, id: &str) -> Result<StatusInfo> {
        let url = self.required_endpoint(category, id)?;
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| map_send_error(e, format!("requesting {url}")))?
            .error_for_status()
            .map_err(|e| map_send_error(e, format!("requesting {url}")))?;
        response
            .json()
            .with_context(|| format!("parsing response from {url}"))
    }
}
