use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, HeaderMap, RANGE};
use reqwest::{Client, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder as MiddlewareRequest};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use reqwest_tracing::TracingMiddleware;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, instrument};
use url::Url;

use crate::domain::errors::DomainError;
use crate::domain::models::ByteRange;
use crate::domain::ports::download_service::{RemoteInfo, RangeTransport, TransferResponse};
use crate::infra::config::{HttpConfig, RetryConfig};
use crate::utils::stream_utils::create_byte_stream;

/// Body pieces buffered between the socket and the chunk worker.
const BODY_CHANNEL_CAPACITY: usize = 32;

/// http client wrapper for reqwest library.
#[derive(Clone)]
pub struct HttpAdapter {
    client: ClientWithMiddleware,
    credentials: Option<(String, Option<SecretString>)>,
}

impl HttpAdapter {
    #[instrument(name = "new_http_adapter", skip_all, fields(retries = retry_config.max_no_retries()))]
    pub fn new(http_config: &HttpConfig, retry_config: &RetryConfig) -> Result<Self> {
        let delay_secs = *retry_config.retry_delay_secs();
        let max_retry_bound = delay_secs.max(2);
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_secs(1), Duration::from_secs(max_retry_bound as u64))
            .build_with_max_retries(*retry_config.max_no_retries() as u32);
        let retry_middleware = RetryTransientMiddleware::new_with_policy(retry_policy);
        let try_client =
            Client::try_from(http_config).context("Can't create http client due to misconfiguration.")?;
        let client: ClientWithMiddleware = ClientBuilder::new(try_client)
            .with(TracingMiddleware::default())
            .with(retry_middleware)
            .build();
        let credentials = http_config
            .username
            .clone()
            .map(|username| (username, http_config.password.clone()));
        Ok(Self { client, credentials })
    }

    fn authorize(&self, request: MiddlewareRequest) -> MiddlewareRequest {
        match &self.credentials {
            Some((username, password)) => {
                request.basic_auth(username, password.as_ref().map(|p| p.expose_secret().to_string()))
            }
            None => request,
        }
    }

    //This function get http response body as chunks,log event especially error and send the chunk to a reciever
    async fn process_chunk(mut resp: Response, tx: Sender<Result<Bytes, DomainError>>) {
        loop {
            match resp.chunk().await {
                Ok(Some(bytes)) => {
                    if tx.send(Ok(bytes)).await.is_err() {
                        debug!("Body receiver dropped, stop reading response.");
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    //Propagate error to the receiver to handle it.
                    if let Err(err) = tx.send(Err(DomainError::Transfer(err.to_string()))).await {
                        error!(error = %err, "Error sending error to channel");
                    }
                    break;
                }
            }
        }
    }
}

/// ``Content-Length`` as a number, ``None`` when missing or garbled.
pub fn parse_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
}

/// ``true`` only for an explicit ``Accept-Ranges: bytes``.
pub fn accepts_byte_ranges(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_RANGES)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
}

#[async_trait]
impl RangeTransport for HttpAdapter {
    #[instrument(name = "reqwest_head", skip(self), fields(url = url.as_str()))]
    async fn inspect(&self, url: &Url) -> Result<RemoteInfo, DomainError> {
        let resp = self
            .authorize(self.client.head(url.clone()))
            .send()
            .await
            .map_err(|err| DomainError::Transfer(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(DomainError::UnexpectedStatus { status: resp.status().as_u16(), url: url.to_string() });
        }
        let headers = resp.headers();
        let remote = RemoteInfo::new(parse_content_length(headers), accepts_byte_ranges(headers));
        debug!(size = ?remote.total_size, supports_ranges = remote.supports_ranges, "Got header response.");
        Ok(remote)
    }

    #[instrument(name = "reqwest_fetch", skip(self), fields(url = url.as_str(), range = ?range))]
    async fn fetch(&self, url: &Url, range: Option<ByteRange>) -> Result<TransferResponse, DomainError> {
        let mut request = self.authorize(self.client.get(url.clone()));
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }
        let resp = request.send().await.map_err(|err| DomainError::Transfer(err.to_string()))?;
        let status = resp.status().as_u16();
        debug!(status, "Got response, streaming body.");

        let (body, producer) = create_byte_stream(BODY_CHANNEL_CAPACITY, move |tx| Self::process_chunk(resp, tx));
        Ok(TransferResponse { status, body, producer: Some(producer) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_content_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_content_length(&headers), None);
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("41943040"));
        assert_eq!(parse_content_length(&headers), Some(40 * 1024 * 1024));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("-12"));
        assert_eq!(parse_content_length(&headers), None);
    }

    #[test]
    fn test_accepts_byte_ranges() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_byte_ranges(&headers));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("none"));
        assert!(!accepts_byte_ranges(&headers));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("Bytes"));
        assert!(accepts_byte_ranges(&headers));
    }

    #[test]
    fn test_adapter_builds_with_credentials() {
        let config = HttpConfig {
            username: Some("player".into()),
            password: Some(SecretString::from("hunter2".to_string())),
            ..HttpConfig::default()
        };
        let adapter = HttpAdapter::new(&config, &RetryConfig::default()).unwrap();
        assert!(adapter.credentials.is_some());
    }
}
