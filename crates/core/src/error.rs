use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::Site;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid proxy identity {identity}: {details}")]
    InvalidIdentity { identity: String, details: String },
}

/// Anti-bot or rate-limit rejection. Recoverable through identity rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedError {
    pub site: Site,
    pub status: Option<u16>,
    pub marker: Option<String>,
}

impl fmt::Display for BlockedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} blocked the request", self.site)?;
        if let Some(status) = self.status {
            write!(f, " (status {status})")?;
        }
        if let Some(marker) = &self.marker {
            write!(f, " (marker '{marker}')")?;
        }
        Ok(())
    }
}

impl std::error::Error for BlockedError {}

/// A single malformed record inside an otherwise usable response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{site}: malformed record: {details}")]
pub struct ParseError {
    pub site: Site,
    pub details: String,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Blocked(#[from] BlockedError),

    #[error("{site} rejected the request: {details}")]
    Rejected { site: Site, details: String },

    #[error("{site}: {source}")]
    Fetch {
        site: Site,
        #[source]
        source: FetchError,
    },

    #[error("{site}: unreadable response: {details}")]
    Parse { site: Site, details: String },

    #[error("{0} skipped: source exhausted for this run")]
    Skipped(Site),
}

#[derive(Debug, Error)]
pub enum DetailFetchError {
    #[error(transparent)]
    Blocked(#[from] BlockedError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("detail page returned status {0}")]
    Status(u16),

    #[error("detail page rejected: {0}")]
    Rejected(String),

    #[error("detail page had no description")]
    Empty,

    #[error("detail fetch timed out")]
    Timeout,

    #[error("{0} skipped: source exhausted for this run")]
    Skipped(Site),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("could not write any of {attempted:?}: {last}")]
    Exhausted {
        attempted: Vec<PathBuf>,
        last: String,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("keyword set is empty")]
    EmptyKeywords,

    #[error("no sources selected")]
    NoSources,

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("invalid alignment bands: {0}")]
    InvalidBands(String),

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("profile parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("regex error: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Lets the rate limiter recognise block signals in any error it carries.
pub trait Throttled: Sized {
    fn blocked(&self) -> Option<&BlockedError>;

    fn source_skipped(site: Site) -> Self;
}

impl Throttled for SourceError {
    fn blocked(&self) -> Option<&BlockedError> {
        match self {
            SourceError::Blocked(blocked) => Some(blocked),
            _ => None,
        }
    }

    fn source_skipped(site: Site) -> Self {
        SourceError::Skipped(site)
    }
}

impl Throttled for DetailFetchError {
    fn blocked(&self) -> Option<&BlockedError> {
        match self {
            DetailFetchError::Blocked(blocked) => Some(blocked),
            _ => None,
        }
    }

    fn source_skipped(site: Site) -> Self {
        DetailFetchError::Skipped(site)
    }
}
