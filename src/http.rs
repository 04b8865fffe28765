use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::Credentials;
use crate::domain::Locator;
use crate::error::AssetError;

const CHUNK_SIZE: usize = 64 * 1024;

pub trait Transport: Send + Sync {
    fn download(
        &self,
        url: &Locator,
        credentials: Option<&Credentials>,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64, AssetError>;

    fn fetch_text(&self, url: &Locator) -> Result<String, AssetError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self, AssetError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("market-assets/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| AssetError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .map_err(|err| AssetError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    fn get(
        &self,
        url: &Locator,
        credentials: Option<&Credentials>,
    ) -> Result<Response, AssetError> {
        let mut request = self.client.get(url.as_str());
        if let Some(login) = credentials {
            request = request.basic_auth(&login.username, login.password.as_ref());
        }
        let response = request
            .send()
            .map_err(|err| AssetError::Http(format!("{url}: {err}")))?;
        Self::handle_status(url, response)
    }

    fn handle_status(url: &Locator, response: Response) -> Result<Response, AssetError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .map(|body| body.chars().take(200).collect::<String>())
            .unwrap_or_else(|_| "request failed".to_string());
        Err(AssetError::HttpStatus {
            url: url.to_string(),
            status,
            message,
        })
    }
}

impl Transport for HttpTransport {
    fn download(
        &self,
        url: &Locator,
        credentials: Option<&Credentials>,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64, AssetError> {
        let start = Instant::now();
        let mut response = self.get(url, credentials)?;
        let total = response.content_length();
        let mut file =
            File::create(destination).map_err(|err| AssetError::Filesystem(err.to_string()))?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut downloaded = 0u64;
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|err| AssetError::Http(format!("{url}: {err}")))?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .map_err(|err| AssetError::Filesystem(err.to_string()))?;
            downloaded += read as u64;
            sink.event(ProgressEvent::transfer(url.as_str(), downloaded, total));
        }
        file.flush()
            .map_err(|err| AssetError::Filesystem(err.to_string()))?;

        debug!(%url, bytes = downloaded, elapsed_ms = start.elapsed().as_millis() as u64, "download complete");
        Ok(downloaded)
    }

    fn fetch_text(&self, url: &Locator) -> Result<String, AssetError> {
        let response = self.get(url, None)?;
        response
            .text()
            .map_err(|err| AssetError::Http(format!("{url}: {err}")))
    }
}
