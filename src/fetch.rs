use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::EtlError;

pub trait SourceFetcher: Send + Sync {
    fn download(&self, url: &str, destination: &Path) -> Result<u64, EtlError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    sas_token: Option<String>,
}

impl HttpFetcher {
    pub fn new(sas_token: Option<String>) -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("deltares-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EtlError::Fetch(err.to_string()))?,
        );
        // Source files run to several GB, so only the connect phase is bounded.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| EtlError::Fetch(err.to_string()))?;
        Ok(Self {
            client,
            sas_token: sas_token
                .map(|token| token.trim().trim_start_matches('?').to_string())
                .filter(|token| !token.is_empty()),
        })
    }

    pub fn sign(&self, url: &str) -> String {
        match &self.sas_token {
            Some(token) if url.contains('?') => format!("{url}&{token}"),
            Some(token) => format!("{url}?{token}"),
            None => url.to_string(),
        }
    }
}

impl SourceFetcher for HttpFetcher {
    fn download(&self, url: &str, destination: &Path) -> Result<u64, EtlError> {
        let mut response = self
            .client
            .get(self.sign(url))
            .send()
            .map_err(|err| EtlError::Fetch(format!("{url}: {err}")))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| format!("GET {url} failed"));
            return Err(EtlError::FetchStatus { status, message });
        }
        let mut file =
            File::create(destination).map_err(|err| EtlError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| EtlError::Fetch(format!("{url}: {err}")))
    }
}
