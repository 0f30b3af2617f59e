//! Bounded-timeout health probes against the companion's control endpoint
//!
//! A probe distinguishes "no listener on this port" from "bridge present":
//! success requires HTTP 200 and a plain-text positive-integer body naming
//! the canonical bridge port.

use std::time::Duration;

use reqwest::Client;
use tracing::trace;

use super::cache::parse_port;
use super::LOOPBACK_HOST;
use crate::{Error, Result};

/// Control path served by current companion versions
pub const BRIDGE_PORT_PATH: &str = "bridge-port";
/// Control path served by older companion versions
pub const LEGACY_PORT_PATH: &str = "port";

pub struct PortProber {
    client: Client,
}

impl PortProber {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(Error::Http)?;
        Ok(Self { client })
    }

    /// Probe one port; returns the canonical bridge port the server reports,
    /// which may differ from the probed port.
    pub async fn probe(&self, port: u16, path: &str) -> Result<u16> {
        let url = format!("http://{}:{}/{}", LOOPBACK_HOST, port, path);
        trace!(%url, "probing bridge port");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Discovery(format!("HTTP {} from {}", status, url)));
        }

        let body = response.text().await?;
        parse_port(&body).ok_or_else(|| {
            Error::Discovery(format!("non-integer port body {:?} from {}", body.trim(), url))
        })
    }
}
