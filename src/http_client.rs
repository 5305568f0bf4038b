use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, USER_AGENT};

use crate::error::TransportError;

const BROWSER_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// One GET, no retries, no pacing. The fetcher layers those on top.
pub trait Transport {
    fn get(&self, url: &str) -> std::result::Result<RawResponse, TransportError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> std::result::Result<RawResponse, TransportError> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, BROWSER_UA)
            .header(ACCEPT, "text/html")
            .send()
            .map_err(|err| TransportError {
                message: format!("request failed: {err}"),
            })?;
        let status = resp.status().as_u16();
        let body = resp.text().map_err(|err| TransportError {
            message: format!("failed reading body: {err}"),
        })?;
        Ok(RawResponse { status, body })
    }
}
