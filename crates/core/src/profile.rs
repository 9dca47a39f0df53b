//! Candidate profile: skill tiers, scoring rules and alignment bands.
//!
//! A profile is loaded once per run and is read-only afterwards. It is plain
//! data so it can be kept in a TOML file next to the run configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ConfigError;
use crate::models::AlignmentLevel;
use crate::text::normalize_term;

/// Lower bounds of each alignment level. Ignore covers `0..stretch`.
///
/// Storing lower bounds makes the bands a partition of `[0, 100]` by
/// construction once `0 < stretch < good < strong <= 100` holds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlignmentBands {
    pub strong: u8,
    pub good: u8,
    pub stretch: u8,
}

impl Default for AlignmentBands {
    fn default() -> Self {
        Self {
            strong: 70,
            good: 45,
            stretch: 20,
        }
    }
}

impl AlignmentBands {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stretch == 0 {
            return Err(ConfigError::InvalidBands(
                "stretch lower bound must be above 0 so Ignore is non-empty".to_string(),
            ));
        }
        if !(self.stretch < self.good && self.good < self.strong) {
            return Err(ConfigError::InvalidBands(format!(
                "bounds must increase: stretch {} < good {} < strong {}",
                self.stretch, self.good, self.strong
            )));
        }
        if self.strong > 100 {
            return Err(ConfigError::InvalidBands(format!(
                "strong lower bound {} exceeds 100",
                self.strong
            )));
        }
        Ok(())
    }

    pub fn level_for(&self, score: u8) -> AlignmentLevel {
        if score >= self.strong {
            AlignmentLevel::Strong
        } else if score >= self.good {
            AlignmentLevel::Good
        } else if score >= self.stretch {
            AlignmentLevel::Stretch
        } else {
            AlignmentLevel::Ignore
        }
    }

    /// Highest score that still maps to Ignore.
    pub fn ignore_ceiling(&self) -> u8 {
        self.stretch.saturating_sub(1)
    }

    pub fn range(&self, level: AlignmentLevel) -> std::ops::RangeInclusive<u8> {
        match level {
            AlignmentLevel::Strong => self.strong..=100,
            AlignmentLevel::Good => self.good..=self.strong - 1,
            AlignmentLevel::Stretch => self.stretch..=self.good - 1,
            AlignmentLevel::Ignore => 0..=self.ignore_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierWeights {
    pub primary_weight: u32,
    pub primary_cap: u32,
    pub secondary_weight: u32,
    pub secondary_cap: u32,
}

impl Default for TierWeights {
    fn default() -> Self {
        Self {
            primary_weight: 12,
            primary_cap: 60,
            secondary_weight: 5,
            secondary_cap: 15,
        }
    }
}

/// A keyword-triggered adjustment. Fires at most once per job however many triggers match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoringRule {
    pub label: String,
    pub triggers: Vec<String>,
    pub points: u32,
}

impl ScoringRule {
    pub fn new(label: &str, triggers: &[&str], points: u32) -> Self {
        Self {
            label: label.to_string(),
            triggers: triggers.iter().map(|trigger| trigger.to_string()).collect(),
            points,
        }
    }
}

/// What an exclusion signal does to an otherwise scored job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionMode {
    /// Score forced to 0; bonuses are discarded.
    #[default]
    Zero,
    /// Score capped at the top of the Ignore band; bonuses otherwise kept.
    Cap,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Profile {
    pub primary_skills: Vec<String>,
    pub secondary_skills: Vec<String>,
    /// Subset reported as missing when absent from a job.
    pub required_skills: Vec<String>,
    pub exclusion_signals: Vec<String>,
    pub exclusion_mode: ExclusionMode,
    pub weights: TierWeights,
    /// Per-skill weight overrides; tier weight applies otherwise.
    pub skill_weights: BTreeMap<String, u32>,
    pub bonus_rules: Vec<ScoringRule>,
    pub penalty_rules: Vec<ScoringRule>,
    pub bands: AlignmentBands,
    /// Extra spellings that count as a skill, keyed by canonical skill.
    pub skill_aliases: BTreeMap<String, Vec<String>>,
}

impl Default for Profile {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|item| item.to_string()).collect();

        let mut skill_aliases = BTreeMap::new();
        skill_aliases.insert(
            "servicenow".to_string(),
            list(&["service now", "service-now"]),
        );
        skill_aliases.insert("log analysis".to_string(), list(&["log monitoring"]));

        Self {
            primary_skills: list(&[
                "linux", "shell", "bash", "servicenow", "itil", "incident", "sla", "mft", "sftp",
                "ftps", "ftp", "as2", "goanywhere", "fms", "ftg", "monitor", "monitoring",
                "alert", "log", "log analysis", "python", "jenkins", "bitbucket", "azure", "aws",
            ]),
            secondary_skills: list(&[
                "java",
                "spring",
                "rest",
                "api",
                "devops",
                "observability",
                "grafana",
                "prometheus",
            ]),
            required_skills: list(&["linux", "sftp", "servicenow", "itil"]),
            exclusion_signals: list(&[
                "frontend",
                "react",
                "vue",
                "angular",
                "ux",
                "ui",
                "dsa",
                "competitive programming",
            ]),
            exclusion_mode: ExclusionMode::Zero,
            weights: TierWeights::default(),
            skill_weights: BTreeMap::new(),
            bonus_rules: vec![
                ScoringRule::new(
                    "managed file transfer",
                    &[
                        "mft",
                        "goanywhere",
                        "go-anywhere",
                        "go anywhere",
                        "managed file transfer",
                        "fms",
                        "ftg",
                    ],
                    10,
                ),
                ScoringRule::new(
                    "on-call / shift work",
                    &["on-call", "on call", "rota", "rotation", "shift", "night shift", "24x7"],
                    7,
                ),
                ScoringRule::new("cloud platform", &["azure", "aws", "gcp", "google cloud"], 5),
                ScoringRule::new("servicenow / itil / incident", &["servicenow", "itil", "incident"], 8),
                ScoringRule::new("ci/cd", &["jenkins", "ci/cd"], 4),
                ScoringRule::new(
                    "support / production focus",
                    &[
                        "production support",
                        "incident management",
                        "problem management",
                        "service desk",
                        "l2 support",
                        "l3 support",
                        "troubleshoot",
                        "root cause",
                    ],
                    6,
                ),
            ],
            penalty_rules: vec![ScoringRule::new(
                "development heavy",
                &["software engineer", "senior backend", "full stack"],
                30,
            )],
            bands: AlignmentBands::default(),
            skill_aliases,
        }
    }
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let profile: Profile = toml::from_str(content)?;
        profile.validated()
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|error| ConfigError::InvalidProfile(error.to_string()))
    }

    /// Normalizes every term list and checks the numeric configuration.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.bands.validate()?;

        self.primary_skills = normalize_list(self.primary_skills);
        self.secondary_skills = normalize_list(self.secondary_skills);
        self.secondary_skills
            .retain(|skill| !self.primary_skills.contains(skill));
        self.required_skills = normalize_list(self.required_skills);
        self.exclusion_signals = normalize_list(self.exclusion_signals);

        if !self.primary_skills.is_empty()
            && (self.weights.primary_weight == 0 || self.weights.primary_cap == 0)
        {
            return Err(ConfigError::InvalidProfile(
                "primary skills need a non-zero weight and cap".to_string(),
            ));
        }
        if !self.secondary_skills.is_empty()
            && (self.weights.secondary_weight == 0 || self.weights.secondary_cap == 0)
        {
            return Err(ConfigError::InvalidProfile(
                "secondary skills need a non-zero weight and cap".to_string(),
            ));
        }

        self.skill_weights = self
            .skill_weights
            .into_iter()
            .map(|(skill, weight)| (normalize_term(&skill), weight))
            .collect();

        self.skill_aliases = self
            .skill_aliases
            .into_iter()
            .map(|(skill, aliases)| (normalize_term(&skill), normalize_list(aliases)))
            .collect();

        for rule in self.bonus_rules.iter_mut().chain(self.penalty_rules.iter_mut()) {
            rule.triggers = normalize_list(std::mem::take(&mut rule.triggers));
            if rule.triggers.is_empty() {
                return Err(ConfigError::InvalidProfile(format!(
                    "rule '{}' has no trigger keywords",
                    rule.label
                )));
            }
            if rule.points == 0 {
                return Err(ConfigError::InvalidProfile(format!(
                    "rule '{}' is worth 0 points",
                    rule.label
                )));
            }
        }

        Ok(self)
    }

    pub fn weight_for(&self, skill: &str, primary: bool) -> u32 {
        self.skill_weights.get(skill).copied().unwrap_or(if primary {
            self.weights.primary_weight
        } else {
            self.weights.secondary_weight
        })
    }

    /// Primary then secondary skills, in profile order.
    pub fn all_skills(&self) -> impl Iterator<Item = &String> {
        self.primary_skills.iter().chain(self.secondary_skills.iter())
    }
}

/// Lower-cases, trims and de-duplicates while keeping first-seen order.
fn normalize_list(items: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let normalized = normalize_term(&item);
        if !normalized.is_empty() && !result.contains(&normalized) {
            result.push(normalized);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_score_maps_to_exactly_one_level() {
        let bands = AlignmentBands::default();
        for score in 0..=100u8 {
            let owners: Vec<AlignmentLevel> = AlignmentLevel::ALL
                .into_iter()
                .filter(|level| bands.range(*level).contains(&score))
                .collect();
            assert_eq!(owners, vec![bands.level_for(score)], "score {score}");
        }
    }

    #[test]
    fn default_band_edges() {
        let bands = AlignmentBands::default();
        assert_eq!(bands.level_for(70), AlignmentLevel::Strong);
        assert_eq!(bands.level_for(69), AlignmentLevel::Good);
        assert_eq!(bands.level_for(45), AlignmentLevel::Good);
        assert_eq!(bands.level_for(44), AlignmentLevel::Stretch);
        assert_eq!(bands.level_for(20), AlignmentLevel::Stretch);
        assert_eq!(bands.level_for(19), AlignmentLevel::Ignore);
        assert_eq!(bands.ignore_ceiling(), 19);
    }

    #[test]
    fn overlapping_or_empty_bands_are_rejected() {
        let overlapping = AlignmentBands { strong: 40, good: 45, stretch: 20 };
        let empty_ignore = AlignmentBands { strong: 70, good: 45, stretch: 0 };
        let too_high = AlignmentBands { strong: 101, good: 45, stretch: 20 };
        assert!(overlapping.validate().is_err());
        assert!(empty_ignore.validate().is_err());
        assert!(too_high.validate().is_err());
    }

    #[test]
    fn toml_profile_is_normalized() -> Result<(), Box<dyn std::error::Error>> {
        let profile = Profile::from_toml_str(
            r#"
            primary_skills = ["Python", " AWS ", "python"]
            secondary_skills = ["Docker", "aws"]
            required_skills = ["Linux"]
            exclusion_signals = ["React"]
            bonus_rules = [{ label = "on-call", triggers = ["On-Call"], points = 7 }]
            penalty_rules = []

            [bands]
            strong = 70
            good = 45
            stretch = 20
            "#,
        )?;

        assert_eq!(profile.primary_skills, vec!["python", "aws"]);
        assert_eq!(profile.secondary_skills, vec!["docker"]);
        assert_eq!(profile.exclusion_signals, vec!["react"]);
        assert_eq!(profile.bonus_rules[0].triggers, vec!["on-call"]);
        assert_eq!(profile.exclusion_mode, ExclusionMode::Zero);
        Ok(())
    }

    #[test]
    fn rules_without_triggers_are_rejected() {
        let result = Profile::from_toml_str(
            r#"
            bonus_rules = [{ label = "empty", triggers = [" "], points = 3 }]
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidProfile(_))));
    }

    #[test]
    fn default_profile_survives_a_toml_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let profile = Profile::default().validated()?;
        let rendered = profile.to_toml_string()?;
        assert_eq!(Profile::from_toml_str(&rendered)?, profile);
        Ok(())
    }
}
