use chrono::{DateTime, Local};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::dedup::normalize_url;
use crate::error::WriteError;
use crate::models::ScoredJob;

const FALLBACK_SUFFIXES: [&str; 5] = ["", "_final", "_final_1", "_final_2", "_final_3"];

/// A CSV row type with a fixed column order.
pub trait CsvRow: Serialize {
    const HEADERS: &'static [&'static str];
}

/// One line of the primary output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrimaryRow {
    pub title: String,
    pub company_name: String,
    pub location: String,
    pub site: String,
    pub job_url: String,
    pub experience_range: String,
    pub key_skills: String,
    pub match_score: u8,
    pub why_this_job_fits: String,
    pub missing_skills: String,
    pub resume_alignment_level: String,
    pub is_remote: bool,
    pub work_from_home_type: String,
}

impl CsvRow for PrimaryRow {
    const HEADERS: &'static [&'static str] = &[
        "title",
        "company_name",
        "location",
        "site",
        "job_url",
        "experience_range",
        "key_skills",
        "match_score",
        "why_this_job_fits",
        "missing_skills",
        "resume_alignment_level",
        "is_remote",
        "work_from_home_type",
    ];
}

impl From<&ScoredJob> for PrimaryRow {
    fn from(scored: &ScoredJob) -> Self {
        let job = &scored.job;
        let listing = &job.listing;
        Self {
            title: listing.title.clone(),
            company_name: listing.company.clone(),
            location: listing.location.clone(),
            site: listing.site.to_string(),
            job_url: listing.job_url.clone(),
            experience_range: job
                .experience
                .map(|range| range.to_string())
                .or_else(|| listing.experience_hint.clone())
                .unwrap_or_default(),
            key_skills: job.skills.iter().cloned().collect::<Vec<_>>().join(", "),
            match_score: scored.result.score,
            why_this_job_fits: scored.result.why_this_job_fits(),
            missing_skills: scored.result.missing_skills.join(", "),
            resume_alignment_level: scored.result.level.label().to_string(),
            is_remote: job.is_remote,
            work_from_home_type: job
                .work_mode
                .map(|mode| mode.label().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Primary columns plus raw text and every intermediate field.
#[derive(Debug, Clone, Serialize)]
pub struct DebugRow {
    pub title: String,
    pub company_name: String,
    pub location: String,
    pub site: String,
    pub job_url: String,
    pub experience_range: String,
    pub key_skills: String,
    pub match_score: u8,
    pub why_this_job_fits: String,
    pub missing_skills: String,
    pub resume_alignment_level: String,
    pub is_remote: bool,
    pub work_from_home_type: String,
    pub external_id: String,
    pub date_posted: String,
    pub description: String,
    pub raw_text: String,
    pub match_reasons: String,
    pub matching_skills: String,
    pub enrichment_status: String,
    pub enrichment_error: String,
    pub company_rating: String,
    pub compensation: String,
    pub extras: String,
}

impl CsvRow for DebugRow {
    const HEADERS: &'static [&'static str] = &[
        "title",
        "company_name",
        "location",
        "site",
        "job_url",
        "experience_range",
        "key_skills",
        "match_score",
        "why_this_job_fits",
        "missing_skills",
        "resume_alignment_level",
        "is_remote",
        "work_from_home_type",
        "external_id",
        "date_posted",
        "description",
        "raw_text",
        "match_reasons",
        "matching_skills",
        "enrichment_status",
        "enrichment_error",
        "company_rating",
        "compensation",
        "extras",
    ];
}

impl From<&ScoredJob> for DebugRow {
    fn from(scored: &ScoredJob) -> Self {
        let primary = PrimaryRow::from(scored);
        let job = &scored.job;
        let listing = &job.listing;
        Self {
            title: primary.title,
            company_name: primary.company_name,
            location: primary.location,
            site: primary.site,
            job_url: primary.job_url,
            experience_range: primary.experience_range,
            key_skills: primary.key_skills,
            match_score: primary.match_score,
            why_this_job_fits: primary.why_this_job_fits,
            missing_skills: primary.missing_skills,
            resume_alignment_level: primary.resume_alignment_level,
            is_remote: primary.is_remote,
            work_from_home_type: primary.work_from_home_type,
            external_id: listing.external_id.clone().unwrap_or_default(),
            date_posted: listing
                .date_posted
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            description: job.description.clone(),
            raw_text: job.raw_text.clone().unwrap_or_default(),
            match_reasons: scored.result.reasons.join(" | "),
            matching_skills: scored.result.matching_skills.join(", "),
            enrichment_status: job.enrichment.label().to_string(),
            enrichment_error: job.enrichment.reason().unwrap_or_default().to_string(),
            company_rating: job.extras.get("company_rating").cloned().unwrap_or_default(),
            compensation: listing
                .compensation
                .as_ref()
                .map(|compensation| compensation.to_string().trim().to_string())
                .unwrap_or_default(),
            extras: job
                .extras
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

fn parent_dir(path: &Path) -> Result<PathBuf, WriteError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    Ok(parent.to_path_buf())
}

fn write_csv<W: Write, R: CsvRow>(out: W, rows: &[R]) -> Result<(), WriteError> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(R::HEADERS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes `rows` to exactly `path`, header first, creating parent directories.
pub fn write_rows<R: CsvRow>(path: &Path, rows: &[R]) -> Result<(), WriteError> {
    parent_dir(path)?;
    write_csv(fs::File::create(path)?, rows)
}

/// Like [`write_rows`], but the file at `path` is only swapped out once the
/// new contents are complete. A failed write leaves the old file untouched.
pub fn replace_rows<R: CsvRow>(path: &Path, rows: &[R]) -> Result<(), WriteError> {
    let mut staged = NamedTempFile::new_in(parent_dir(path)?)?;
    write_csv(staged.as_file_mut(), rows)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|error| error.error)?;
    Ok(())
}

pub fn read_rows<R: DeserializeOwned>(path: &Path) -> Result<Vec<R>, WriteError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// `<stem>.csv`, then `<stem>_final.csv`, then `<stem>_final_1.csv` up to `_final_3`.
pub fn fallback_candidates(path: &Path) -> Vec<PathBuf> {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "jobs".to_string());
    let extension = path
        .extension()
        .map(|extension| extension.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());

    FALLBACK_SUFFIXES
        .iter()
        .map(|suffix| path.with_file_name(format!("{stem}{suffix}.{extension}")))
        .collect()
}

/// Writes the primary output, moving on to the next candidate name whenever
/// one cannot be written. Returns the path actually used.
pub fn write_with_fallback<R: CsvRow>(path: &Path, rows: &[R]) -> Result<PathBuf, WriteError> {
    let candidates = fallback_candidates(path);
    let mut last = String::new();

    for candidate in &candidates {
        match write_rows(candidate, rows) {
            Ok(()) => {
                if candidate != path {
                    warn!(requested = %path.display(), written = %candidate.display(), "output path unavailable, used fallback");
                }
                info!(path = %candidate.display(), rows = rows.len(), "output written");
                return Ok(candidate.clone());
            }
            Err(error) => {
                warn!(path = %candidate.display(), error = %error, "could not write output");
                last = error.to_string();
            }
        }
    }

    Err(WriteError::Exhausted {
        attempted: candidates,
        last,
    })
}

/// What a post-run hook gets to see.
#[derive(Debug)]
pub struct HookContext<'a> {
    /// Every scored job of the run, filtered or not.
    pub jobs: &'a [ScoredJob],
    pub min_score: Option<u8>,
    pub requested_path: &'a Path,
    pub written_path: &'a Path,
    pub generated_at: DateTime<Local>,
}

impl HookContext<'_> {
    pub fn written_jobs(&self) -> impl Iterator<Item = &ScoredJob> {
        let min_score = self.min_score.unwrap_or(0);
        self.jobs
            .iter()
            .filter(move |scored| scored.result.score >= min_score)
    }

    fn stem(&self) -> String {
        self.requested_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "jobs".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOutcome {
    pub hook: String,
    pub result: Result<String, String>,
}

/// Output side effect run by the controller once the primary file is written.
pub trait PostRunHook: Send + Sync {
    fn name(&self) -> &str;

    /// Returns a one-line summary of what was done.
    fn run(&self, context: &HookContext<'_>) -> Result<String, WriteError>;
}

/// Timestamped dump of every row with raw text and intermediate fields.
#[derive(Debug, Clone, Default)]
pub struct DebugDumpHook {
    dir: Option<PathBuf>,
}

impl DebugDumpHook {
    /// `None` puts the dump next to the primary output.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn dump_path(&self, context: &HookContext<'_>) -> PathBuf {
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => context
                .written_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        let base = format!(
            "{}_debug_{}",
            context.stem(),
            context.generated_at.format("%Y%m%d_%H%M%S")
        );

        let mut path = dir.join(format!("{base}.csv"));
        let mut suffix = 1;
        while path.exists() {
            path = dir.join(format!("{base}_{suffix}.csv"));
            suffix += 1;
        }
        path
    }
}

impl PostRunHook for DebugDumpHook {
    fn name(&self) -> &str {
        "debug-dump"
    }

    fn run(&self, context: &HookContext<'_>) -> Result<String, WriteError> {
        let path = self.dump_path(context);
        let rows: Vec<DebugRow> = context.jobs.iter().map(DebugRow::from).collect();
        write_rows(&path, &rows)?;
        Ok(format!("{} rows to {}", rows.len(), path.display()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeepStrategy {
    /// The newest run's row replaces an existing one.
    #[default]
    Latest,
    /// The row with the higher match score stays.
    BestScore,
}

impl std::str::FromStr for KeepStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "latest" => Ok(KeepStrategy::Latest),
            "best_score" => Ok(KeepStrategy::BestScore),
            other => Err(format!("unknown keep strategy: {other}")),
        }
    }
}

/// Folds a run's written rows into a long-lived master CSV, one row per
/// normalized job URL.
#[derive(Debug, Clone)]
pub struct MasterAggregateHook {
    path: PathBuf,
    strategy: KeepStrategy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub added: usize,
    pub replaced: usize,
    pub total: usize,
}

impl MasterAggregateHook {
    pub fn new(path: impl Into<PathBuf>, strategy: KeepStrategy) -> Self {
        Self {
            path: path.into(),
            strategy,
        }
    }

    pub fn merge(&self, existing: &mut Vec<PrimaryRow>, incoming: Vec<PrimaryRow>) -> MergeCounts {
        let mut index: HashMap<String, usize> = existing
            .iter()
            .enumerate()
            .map(|(position, row)| (normalize_url(&row.job_url), position))
            .collect();
        let mut counts = MergeCounts::default();

        for row in incoming {
            let key = normalize_url(&row.job_url);
            match index.get(&key) {
                Some(&position) => {
                    let replace = match self.strategy {
                        KeepStrategy::Latest => true,
                        KeepStrategy::BestScore => row.match_score > existing[position].match_score,
                    };
                    if replace {
                        existing[position] = row;
                        counts.replaced += 1;
                    }
                }
                None => {
                    index.insert(key, existing.len());
                    existing.push(row);
                    counts.added += 1;
                }
            }
        }

        counts.total = existing.len();
        counts
    }
}

impl PostRunHook for MasterAggregateHook {
    fn name(&self) -> &str {
        "master-aggregate"
    }

    fn run(&self, context: &HookContext<'_>) -> Result<String, WriteError> {
        let mut master: Vec<PrimaryRow> = if self.path.exists() {
            read_rows(&self.path)?
        } else {
            Vec::new()
        };
        let incoming = context.written_jobs().map(PrimaryRow::from).collect();
        let counts = self.merge(&mut master, incoming);
        replace_rows(&self.path, &master)?;

        Ok(format!(
            "{} added, {} replaced, {} rows in {}",
            counts.added,
            counts.replaced,
            counts.total,
            self.path.display()
        ))
    }
}
