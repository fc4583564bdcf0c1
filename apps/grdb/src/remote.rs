//! # Remote Spectrum Retrieval
//!
//! Raman spectra live in object storage. A file record carries either a
//! cached presigned URL or the object name to sign. Signing goes through
//! the configured signer endpoint:
//!
//! ```text
//! POST {signer_url}   {"object_name": "..."}   ->   {"url": "https://..."}
//! ```
//!
//! The body is streamed chunk by chunk through the incremental
//! `TimeSeriesParser`; the first malformed line aborts the retrieval.

use crate::config::RemoteConfig;
use grdb_core::{GrdbError, RamanFile, SpectrumPoint, TimeSeriesParser};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    object_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    url: String,
}

/// A download URL and whether it was just signed (and should be cached).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    pub url: String,
    pub newly_signed: bool,
}

/// HTTP client for signing and downloading spectra.
#[derive(Debug, Clone)]
pub struct SpectrumFetcher {
    client: Client,
    signer_url: Option<String>,
    allow_insecure: bool,
}

impl SpectrumFetcher {
    pub fn new(config: &RemoteConfig) -> Result<Self, GrdbError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GrdbError::RemoteFetch(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            signer_url: config.signer_url.clone(),
            allow_insecure: config.allow_insecure,
        })
    }

    fn checked_url(&self, raw: &str) -> Result<Url, GrdbError> {
        let url = Url::parse(raw)
            .map_err(|e| GrdbError::RemoteFetch(format!("invalid URL '{}': {}", raw, e)))?;
        match url.scheme() {
            "https" => Ok(url),
            "http" if self.allow_insecure => Ok(url),
            scheme => Err(GrdbError::RemoteFetch(format!(
                "refusing {} URL; only https is allowed",
                scheme
            ))),
        }
    }

    /// Exchange an object name for a presigned URL.
    pub async fn presign(&self, object_name: &str) -> Result<String, GrdbError> {
        let signer = self.signer_url.as_deref().ok_or_else(|| {
            GrdbError::RemoteFetch("no signer_url configured for object storage".to_string())
        })?;
        let signer = self.checked_url(signer)?;

        let response = self
            .client
            .post(signer)
            .json(&SignRequest { object_name })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| GrdbError::RemoteFetch(format!("signing '{}': {}", object_name, e)))?;
        let signed: SignResponse = response
            .json()
            .await
            .map_err(|e| GrdbError::RemoteFetch(format!("signer response: {}", e)))?;

        self.checked_url(&signed.url)?;
        tracing::debug!(object = object_name, "presigned spectrum URL");
        Ok(signed.url)
    }

    /// The cached URL of `file`, or a freshly signed one.
    pub async fn resolve(&self, file: &RamanFile) -> Result<ResolvedUrl, GrdbError> {
        if let Some(url) = &file.url {
            return Ok(ResolvedUrl {
                url: url.clone(),
                newly_signed: false,
            });
        }
        let object = file.s3_object_name.as_deref().ok_or_else(|| {
            GrdbError::RemoteFetch(format!(
                "Raman file {} has neither a URL nor an object name",
                file.id.0
            ))
        })?;
        Ok(ResolvedUrl {
            url: self.presign(object).await?,
            newly_signed: true,
        })
    }

    /// Download and parse a spectrum.
    pub async fn fetch(&self, url: &str) -> Result<Vec<SpectrumPoint>, GrdbError> {
        let url = self.checked_url(url)?;
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| GrdbError::RemoteFetch(e.to_string()))?;

        let mut parser = TimeSeriesParser::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| GrdbError::RemoteFetch(e.to_string()))?
        {
            parser.feed(&chunk)?;
        }
        let points = parser.finish()?;
        tracing::debug!(points = points.len(), "spectrum retrieved");
        Ok(points)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use grdb_core::{ExperimentId, RamanFileId};

    fn fetcher(allow_insecure: bool) -> SpectrumFetcher {
        SpectrumFetcher::new(&RemoteConfig {
            signer_url: None,
            timeout_secs: 5,
            allow_insecure,
        })
        .unwrap()
    }

    fn file(url: Option<&str>, object: Option<&str>) -> RamanFile {
        RamanFile {
            id: RamanFileId(7),
            experiment_id: ExperimentId(1),
            filename: "spectrum.txt".to_string(),
            url: url.map(str::to_string),
            s3_object_name: object.map(str::to_string),
            wavelength: None,
        }
    }

    #[test]
    fn plain_http_is_refused_by_default() {
        let err = fetcher(false).checked_url("http://example.com/a").unwrap_err();
        assert!(matches!(err, GrdbError::RemoteFetch(ref m) if m.contains("http")));
        assert!(fetcher(true).checked_url("http://example.com/a").is_ok());
        assert!(fetcher(true).checked_url("ftp://example.com/a").is_err());
    }

    #[tokio::test]
    async fn cached_url_is_reused() {
        let resolved = fetcher(false)
            .resolve(&file(Some("https://bucket/a?sig=1"), Some("a")))
            .await
            .unwrap();
        assert_eq!(resolved.url, "https://bucket/a?sig=1");
        assert!(!resolved.newly_signed);
    }

    #[tokio::test]
    async fn signing_without_signer_fails() {
        let err = fetcher(false).resolve(&file(None, Some("a"))).await.unwrap_err();
        assert!(matches!(err, GrdbError::RemoteFetch(_)));
        let err = fetcher(false).resolve(&file(None, None)).await.unwrap_err();
        assert!(matches!(err, GrdbError::RemoteFetch(ref m) if m.contains("neither")));
    }
}
