//! The page-fetch contract every source goes through.
//!
//! Plain HTTP, an authenticated session or a browser-automation layer all
//! look the same to the pipeline: a `PageFetcher` that turns a
//! `FetchRequest` into a `FetchedPage`. Block detection happens one level up,
//! on the returned status and body.

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::FetchError;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub final_url: String,
    pub body: String,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Redacted label of the egress identity, safe to log.
    fn identity(&self) -> String;

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError>;
}

/// One egress identity: a proxy (`host:port`, optionally `user:pass@host:port`
/// or a full `scheme://` URL) or a direct connection.
#[derive(Clone, PartialEq, Eq)]
pub enum ProxyIdentity {
    Direct,
    Proxy(String),
}

impl ProxyIdentity {
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("direct") {
            return Ok(ProxyIdentity::Direct);
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };

        let parsed = Url::parse(&with_scheme).map_err(|error| FetchError::InvalidIdentity {
            identity: redact_credentials(trimmed),
            details: error.to_string(),
        })?;
        if parsed.host_str().is_none() {
            return Err(FetchError::InvalidIdentity {
                identity: redact_credentials(trimmed),
                details: "missing host".to_string(),
            });
        }

        Ok(ProxyIdentity::Proxy(with_scheme))
    }

    /// Empty input means a single direct identity.
    pub fn parse_list(raw: &[String]) -> Result<Vec<Self>, FetchError> {
        let identities = raw
            .iter()
            .filter(|item| !item.trim().is_empty())
            .map(|item| Self::parse(item))
            .collect::<Result<Vec<_>, _>>()?;

        if identities.is_empty() {
            Ok(vec![ProxyIdentity::Direct])
        } else {
            Ok(identities)
        }
    }
}

impl fmt::Display for ProxyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyIdentity::Direct => f.write_str("direct"),
            ProxyIdentity::Proxy(url) => f.write_str(&redact_credentials(url)),
        }
    }
}

impl fmt::Debug for ProxyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyIdentity({self})")
    }
}

fn redact_credentials(raw: &str) -> String {
    match raw.rsplit_once('@') {
        Some((prefix, host)) => {
            let scheme = prefix
                .split_once("://")
                .map(|(scheme, _)| format!("{scheme}://"))
                .unwrap_or_default();
            format!("{scheme}***@{host}")
        }
        None => raw.to_string(),
    }
}

/// Opaque, already-authenticated session material for sources that need a login.
///
/// The pipeline only forwards the headers; it never creates, refreshes or logs them.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionHandle {
    headers: Vec<(String, String)>,
}

impl SessionHandle {
    pub fn from_cookie(cookie: impl Into<String>) -> Self {
        Self {
            headers: vec![("cookie".to_string(), cookie.into())],
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn apply(&self, mut request: FetchRequest) -> FetchRequest {
        request.headers.extend(self.headers.iter().cloned());
        request
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.headers.iter().map(|(name, _)| name.as_str()).collect();
        write!(f, "SessionHandle({names:?}, values redacted)")
    }
}

pub struct HttpFetcher {
    client: Arc<Client>,
    identity: ProxyIdentity,
}

impl HttpFetcher {
    pub fn new(identity: ProxyIdentity, timeout: Duration) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(timeout);

        builder = match &identity {
            ProxyIdentity::Direct => builder.no_proxy(),
            ProxyIdentity::Proxy(url) => builder.proxy(Proxy::all(url.as_str())?),
        };

        Ok(Self {
            client: Arc::new(builder.build()?),
            identity,
        })
    }

    /// One fetcher per identity, in pool order.
    pub fn pool(
        identities: &[ProxyIdentity],
        timeout: Duration,
    ) -> Result<Vec<Arc<dyn PageFetcher>>, FetchError> {
        identities
            .iter()
            .map(|identity| {
                Self::new(identity.clone(), timeout)
                    .map(|fetcher| Arc::new(fetcher) as Arc<dyn PageFetcher>)
            })
            .collect()
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    fn identity(&self) -> String {
        self.identity.to_string()
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
        let url = Url::parse(&request.url)?;
        let mut builder = self.client.get(url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;

        Ok(FetchedPage {
            status,
            final_url,
            body,
        })
    }
}

/// Answers every request with an empty 200 page without touching the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineFetcher;

#[async_trait]
impl PageFetcher for OfflineFetcher {
    fn identity(&self) -> String {
        "offline".to_string()
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
        Ok(FetchedPage {
            status: 200,
            final_url: request.url.clone(),
            body: String::new(),
        })
    }
}
