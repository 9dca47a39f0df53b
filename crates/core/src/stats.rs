use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{AlignmentLevel, Site};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    /// Blocks were seen but rotation recovered.
    PartiallyBlocked,
    Exhausted,
    Errored(String),
}

impl SourceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SourceStatus::Ok => "ok",
            SourceStatus::PartiallyBlocked => "partially-blocked",
            SourceStatus::Exhausted => "exhausted",
            SourceStatus::Errored(_) => "errored",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Errored(reason) => write!(f, "errored ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SourceReport {
    pub discovered: usize,
    pub pages: usize,
    pub parse_failures: usize,
    pub blocked_events: u32,
    pub status: SourceStatus,
}

/// Counters for one run. Only the pipeline controller mutates them.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunStats {
    pub sources: BTreeMap<Site, SourceReport>,
    pub invalid_dropped: usize,
    pub duplicates_dropped: usize,
    pub enriched: usize,
    pub enrichment_failed: usize,
    pub enrichment_skipped: usize,
    pub scored: usize,
    pub filtered_below_minimum: usize,
    pub written: usize,
    pub levels: BTreeMap<AlignmentLevel, usize>,
}

/// The counts a caller needs to render a run summary.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub discovered: usize,
    pub enriched: usize,
    pub duplicates_dropped: usize,
    pub scored: usize,
    pub written: usize,
    pub sources: Vec<(Site, String)>,
}

impl RunStats {
    pub fn record_source(&mut self, site: Site, report: SourceReport) {
        self.sources.insert(site, report);
    }

    pub fn record_level(&mut self, level: AlignmentLevel) {
        *self.levels.entry(level).or_default() += 1;
    }

    pub fn discovered(&self) -> usize {
        self.sources.values().map(|report| report.discovered).sum()
    }

    pub fn parse_failures(&self) -> usize {
        self.sources.values().map(|report| report.parse_failures).sum()
    }

    pub fn level_count(&self, level: AlignmentLevel) -> usize {
        self.levels.get(&level).copied().unwrap_or_default()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            discovered: self.discovered(),
            enriched: self.enriched,
            duplicates_dropped: self.duplicates_dropped,
            scored: self.scored,
            written: self.written,
            sources: self
                .sources
                .iter()
                .map(|(site, report)| (*site, report.status.to_string()))
                .collect(),
        }
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "discovered {} | enriched {} (failed {}, skipped {}) | duplicates dropped {} | scored {} | written {}",
            self.discovered(),
            self.enriched,
            self.enrichment_failed,
            self.enrichment_skipped,
            self.duplicates_dropped,
            self.scored,
            self.written,
        )?;
        if self.invalid_dropped > 0 || self.parse_failures() > 0 {
            writeln!(
                f,
                "invalid rows dropped {} | malformed records {}",
                self.invalid_dropped,
                self.parse_failures()
            )?;
        }
        for (site, report) in &self.sources {
            writeln!(
                f,
                "  {site:<17} {:>4} listings  {:>3} pages  {}",
                report.discovered, report.pages, report.status
            )?;
        }
        let histogram = AlignmentLevel::ALL
            .iter()
            .map(|level| format!("{}: {}", level.label(), self.level_count(*level)))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "  levels: {histogram}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(discovered: usize, status: SourceStatus) -> SourceReport {
        SourceReport {
            discovered,
            pages: 1,
            parse_failures: 1,
            blocked_events: 0,
            status,
        }
    }

    #[test]
    fn summary_sums_sources_and_keeps_statuses() {
        let mut stats = RunStats::default();
        stats.record_source(Site::Naukri, report(12, SourceStatus::Ok));
        stats.record_source(Site::LinkedIn, report(3, SourceStatus::Exhausted));
        stats.duplicates_dropped = 2;
        stats.scored = 13;
        stats.written = 10;

        let summary = stats.summary();
        assert_eq!(summary.discovered, 15);
        assert_eq!(summary.duplicates_dropped, 2);
        assert_eq!(
            summary.sources,
            vec![
                (Site::LinkedIn, "exhausted".to_string()),
                (Site::Naukri, "ok".to_string())
            ]
        );
        assert_eq!(stats.parse_failures(), 2);
    }

    #[test]
    fn display_lists_every_level() {
        let mut stats = RunStats::default();
        stats.record_level(AlignmentLevel::Good);
        stats.record_level(AlignmentLevel::Good);
        stats.record_source(
            Site::RemoteRocketship,
            report(0, SourceStatus::Errored("run deadline reached".to_string())),
        );

        let rendered = stats.to_string();
        assert!(rendered.contains("Good Match: 2"));
        assert!(rendered.contains("Strong Match: 0"));
        assert!(rendered.contains("errored (run deadline reached)"));
    }
}
