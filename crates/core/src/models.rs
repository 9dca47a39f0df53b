use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Job boards the pipeline knows how to query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Site {
    LinkedIn,
    Naukri,
    RemoteRocketship,
}

impl Site {
    pub const ALL: [Site; 3] = [Site::LinkedIn, Site::Naukri, Site::RemoteRocketship];

    pub fn as_str(&self) -> &'static str {
        match self {
            Site::LinkedIn => "linkedin",
            Site::Naukri => "naukri",
            Site::RemoteRocketship => "remoterocketship",
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Site {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key: String = value
            .trim()
            .to_lowercase()
            .chars()
            .filter(|ch| !matches!(ch, '_' | '-' | ' '))
            .collect();
        match key.as_str() {
            "linkedin" => Ok(Site::LinkedIn),
            "naukri" => Ok(Site::Naukri),
            "remoterocketship" => Ok(Site::RemoteRocketship),
            _ => Err(ConfigError::UnknownSource(value.trim().to_string())),
        }
    }
}

/// Immutable input of a run. Built once by the pipeline from a validated `RunConfig`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchQuery {
    pub keywords: Vec<String>,
    pub location: Option<String>,
    pub sites: Vec<Site>,
    pub results_wanted: usize,
    pub remote_only: bool,
    pub hours_old: Option<u32>,
}

impl SearchQuery {
    pub fn new(
        keywords: Vec<String>,
        location: Option<String>,
        sites: Vec<Site>,
        results_wanted: usize,
    ) -> Result<Self, ConfigError> {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|keyword| keyword.trim().to_string())
            .filter(|keyword| !keyword.is_empty())
            .collect();

        if keywords.is_empty() {
            return Err(ConfigError::EmptyKeywords);
        }
        if sites.is_empty() {
            return Err(ConfigError::NoSources);
        }
        if results_wanted == 0 {
            return Err(ConfigError::InvalidArgument(
                "results wanted must be at least 1".to_string(),
            ));
        }

        let mut unique_sites = Vec::with_capacity(sites.len());
        for site in sites {
            if !unique_sites.contains(&site) {
                unique_sites.push(site);
            }
        }

        Ok(Self {
            keywords,
            location: location
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            sites: unique_sites,
            results_wanted,
            remote_only: false,
            hours_old: None,
        })
    }

    pub fn with_remote_only(mut self, remote_only: bool) -> Self {
        self.remote_only = remote_only;
        self
    }

    pub fn with_hours_old(mut self, hours_old: Option<u32>) -> Self {
        self.hours_old = hours_old;
        self
    }

    /// Boolean search term sent to the boards: `"k1" OR "k2"`.
    pub fn search_term(&self) -> String {
        if self.keywords.len() == 1 {
            return self.keywords[0].clone();
        }
        self.keywords
            .iter()
            .map(|keyword| format!("\"{keyword}\""))
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    /// Position of a site in the declared source order; used for output consolidation.
    pub fn site_rank(&self, site: Site) -> usize {
        self.sites
            .iter()
            .position(|candidate| *candidate == site)
            .unwrap_or(self.sites.len())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Compensation {
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub currency: Option<String>,
    pub interval: Option<String>,
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let currency = self.currency.as_deref().unwrap_or("");
        match (self.min_amount, self.max_amount) {
            (Some(min), Some(max)) => write!(f, "{currency} {min:.0}-{max:.0}")?,
            (Some(min), None) => write!(f, "{currency} {min:.0}+")?,
            (None, Some(max)) => write!(f, "{currency} up to {max:.0}")?,
            (None, None) => return Ok(()),
        }
        if let Some(interval) = &self.interval {
            write!(f, " {interval}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkMode {
    Remote,
    Hybrid,
    Onsite,
}

impl WorkMode {
    pub fn label(&self) -> &'static str {
        match self {
            WorkMode::Remote => "Remote",
            WorkMode::Hybrid => "Hybrid",
            WorkMode::Onsite => "Work from office",
        }
    }
}

impl fmt::Display for WorkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A source's native summary record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawListing {
    pub external_id: Option<String>,
    pub site: Site,
    pub title: String,
    pub company: String,
    pub location: String,
    pub job_url: String,
    pub short_description: Option<String>,
    pub compensation: Option<Compensation>,
    pub is_remote: Option<bool>,
    pub work_mode: Option<WorkMode>,
    pub date_posted: Option<NaiveDate>,
    pub skill_hints: Vec<String>,
    pub experience_hint: Option<String>,
    pub extras: BTreeMap<String, String>,
    pub discovered_at: DateTime<Utc>,
}

impl RawListing {
    pub fn new(site: Site, job_url: impl Into<String>) -> Self {
        Self {
            external_id: None,
            site,
            title: String::new(),
            company: String::new(),
            location: String::new(),
            job_url: job_url.into(),
            short_description: None,
            compensation: None,
            is_remote: None,
            work_mode: None,
            date_posted: None,
            skill_hints: Vec::new(),
            experience_hint: None,
            extras: BTreeMap::new(),
            discovered_at: Utc::now(),
        }
    }

    /// Text available without a detail fetch.
    pub fn summary_text(&self) -> String {
        match &self.short_description {
            Some(description) if !description.trim().is_empty() => {
                format!("{}\n{}", self.title, description)
            }
            _ => self.title.clone(),
        }
    }
}

/// Page-level result of a detail fetch, before feature extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobDetail {
    pub description: String,
    pub raw_text: String,
    pub fields: BTreeMap<String, String>,
    pub is_remote: Option<bool>,
    pub work_mode: Option<WorkMode>,
    pub skill_hints: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperienceRange {
    pub min_years: u32,
    pub max_years: Option<u32>,
}

impl fmt::Display for ExperienceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max_years {
            Some(max) => write!(f, "{}-{} years", self.min_years, max),
            None => write!(f, "{}+ years", self.min_years),
        }
    }
}

/// Structured signals pulled out of free text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFeatures {
    pub skills: BTreeSet<String>,
    pub experience: Option<ExperienceRange>,
    pub is_remote: bool,
    pub work_mode: Option<WorkMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Enriched,
    /// Full text was already part of the listing.
    FromListing,
    Failed(String),
    Skipped(String),
}

impl EnrichmentStatus {
    pub fn is_enriched(&self) -> bool {
        matches!(self, EnrichmentStatus::Enriched | EnrichmentStatus::FromListing)
    }

    pub fn label(&self) -> &'static str {
        match self {
            EnrichmentStatus::Enriched => "enriched",
            EnrichmentStatus::FromListing => "from_listing",
            EnrichmentStatus::Failed(_) => "failed",
            EnrichmentStatus::Skipped(_) => "skipped",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            EnrichmentStatus::Failed(reason) | EnrichmentStatus::Skipped(reason) => Some(reason),
            _ => None,
        }
    }
}

/// A listing plus its full text and extracted signals. One per surviving `RawListing`.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedJob {
    pub listing: RawListing,
    pub description: String,
    pub raw_text: Option<String>,
    pub skills: BTreeSet<String>,
    pub experience: Option<ExperienceRange>,
    pub is_remote: bool,
    pub work_mode: Option<WorkMode>,
    pub extras: BTreeMap<String, String>,
    pub enrichment: EnrichmentStatus,
}

impl EnrichedJob {
    pub fn new(
        listing: RawListing,
        description: String,
        raw_text: Option<String>,
        features: ExtractedFeatures,
        enrichment: EnrichmentStatus,
    ) -> Self {
        let extras = listing.extras.clone();
        Self {
            listing,
            description,
            raw_text,
            skills: features.skills,
            experience: features.experience,
            is_remote: features.is_remote,
            work_mode: features.work_mode,
            extras,
            enrichment,
        }
    }

    /// Title and description, the text scoring rules look at.
    pub fn searchable_text(&self) -> String {
        format!("{}\n{}", self.listing.title, self.description)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlignmentLevel {
    Strong,
    Good,
    Stretch,
    Ignore,
}

impl AlignmentLevel {
    pub const ALL: [AlignmentLevel; 4] = [
        AlignmentLevel::Strong,
        AlignmentLevel::Good,
        AlignmentLevel::Stretch,
        AlignmentLevel::Ignore,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AlignmentLevel::Strong => "Strong Match",
            AlignmentLevel::Good => "Good Match",
            AlignmentLevel::Stretch => "Stretch Role",
            AlignmentLevel::Ignore => "Ignore",
        }
    }
}

impl fmt::Display for AlignmentLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchResult {
    pub score: u8,
    pub level: AlignmentLevel,
    pub matching_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub reasons: Vec<String>,
}

impl MatchResult {
    pub fn why_this_job_fits(&self) -> String {
        self.reasons.join("; ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredJob {
    pub job: EnrichedJob,
    pub result: MatchResult,
}
