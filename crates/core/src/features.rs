use regex::Regex;
use std::collections::BTreeSet;

use crate::error::ConfigError;
use crate::models::{ExperienceRange, ExtractedFeatures, WorkMode};
use crate::profile::Profile;
use crate::text::{contains_term, normalize_term};

const BUILTIN_ALIASES: [(&str, &[&str]); 5] = [
    ("servicenow", &["service now", "service-now"]),
    ("ci/cd", &["ci cd", "ci-cd", "cicd"]),
    ("kubernetes", &["k8s"]),
    ("go", &["golang"]),
    ("javascript", &["js"]),
];

const HYBRID_TERMS: [&str; 2] = ["hybrid", "flexible work"];
const REMOTE_TERMS: [&str; 4] = ["remote", "work from home", "wfh", "fully remote"];
const ONSITE_TERMS: [&str; 6] = [
    "work from office",
    "wfo",
    "on-site",
    "onsite",
    "on site",
    "in-office",
];

const EXPERIENCE_PATTERN: &str =
    r"(?i)\b(\d{1,2})\s*(?:\+\s*)?(?:(?:-|–|to)\s*(\d{1,2})\s*)?(?:\+\s*)?(?:years?|yrs?)\b";

/// Skills the extractor looks for, each with the spellings that count as it.
#[derive(Debug, Clone, Default)]
pub struct SkillVocabulary {
    entries: Vec<(String, Vec<String>)>,
}

impl SkillVocabulary {
    pub fn new<I, S>(skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocabulary = Self::default();
        for skill in skills {
            vocabulary.insert(skill.as_ref(), &[]);
        }
        vocabulary
    }

    pub fn from_profile(profile: &Profile) -> Self {
        let mut vocabulary = Self::default();
        for skill in profile.all_skills() {
            let aliases = profile
                .skill_aliases
                .get(skill)
                .map(Vec::as_slice)
                .unwrap_or_default();
            vocabulary.insert(skill, aliases);
        }
        vocabulary
    }

    fn insert(&mut self, skill: &str, aliases: &[String]) {
        let canonical = normalize_term(skill);
        if canonical.is_empty() || self.entries.iter().any(|(known, _)| *known == canonical) {
            return;
        }

        let mut spellings = vec![canonical.clone()];
        let builtin = BUILTIN_ALIASES
            .iter()
            .find(|(name, _)| *name == canonical)
            .map(|(_, extra)| extra.iter().map(|alias| alias.to_string()).collect::<Vec<_>>())
            .unwrap_or_default();
        for alias in aliases.iter().cloned().chain(builtin) {
            let alias = normalize_term(&alias);
            if !alias.is_empty() && !spellings.contains(&alias) {
                spellings.push(alias);
            }
        }

        self.entries.push((canonical, spellings));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical name for a spelling, if the vocabulary knows it.
    pub fn canonical(&self, term: &str) -> Option<&str> {
        let term = normalize_term(term);
        self.entries
            .iter()
            .find(|(_, spellings)| spellings.contains(&term))
            .map(|(canonical, _)| canonical.as_str())
    }

    /// Every canonical skill mentioned in `lowered`.
    pub fn find_in(&self, lowered: &str) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|(_, spellings)| spellings.iter().any(|spelling| contains_term(lowered, spelling)))
            .map(|(canonical, _)| canonical.clone())
            .collect()
    }
}

/// Structured fields a source already provided; they win over text inference.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListingHints<'a> {
    pub is_remote: Option<bool>,
    pub work_mode: Option<WorkMode>,
    pub skills: &'a [String],
    pub experience: Option<&'a str>,
    pub location: &'a str,
}

/// Pulls skills, experience range and work mode out of a description.
///
/// Pure and deterministic: identical text and hints always yield identical features.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    vocabulary: SkillVocabulary,
    experience_re: Regex,
}

impl FeatureExtractor {
    pub fn new(vocabulary: SkillVocabulary) -> Result<Self, ConfigError> {
        Ok(Self {
            vocabulary,
            experience_re: Regex::new(EXPERIENCE_PATTERN)?,
        })
    }

    pub fn for_profile(profile: &Profile) -> Result<Self, ConfigError> {
        Self::new(SkillVocabulary::from_profile(profile))
    }

    pub fn extract(&self, text: &str, hints: &ListingHints<'_>) -> ExtractedFeatures {
        let mut skills = self.extract_skills(text);
        for hint in hints.skills {
            let normalized = normalize_term(hint);
            if normalized.is_empty() {
                continue;
            }
            let canonical = self
                .vocabulary
                .canonical(&normalized)
                .map(str::to_string)
                .unwrap_or(normalized);
            skills.insert(canonical);
        }

        let experience = hints
            .experience
            .and_then(|hint| self.extract_experience(hint))
            .or_else(|| self.extract_experience(text));

        let (is_remote, work_mode) = classify_work_mode(text, hints);

        ExtractedFeatures {
            skills,
            experience,
            is_remote,
            work_mode,
        }
    }

    pub fn extract_skills(&self, text: &str) -> BTreeSet<String> {
        self.vocabulary.find_in(&text.to_lowercase())
    }

    /// First "X-Y years" / "X+ years" / "X to Y yrs" phrase in the text.
    pub fn extract_experience(&self, text: &str) -> Option<ExperienceRange> {
        for captures in self.experience_re.captures_iter(text) {
            let Some(min_years) = captures
                .get(1)
                .and_then(|value| value.as_str().parse::<u32>().ok())
            else {
                continue;
            };
            let max_years = captures
                .get(2)
                .and_then(|value| value.as_str().parse::<u32>().ok())
                .filter(|max| *max >= min_years);

            return Some(ExperienceRange {
                min_years,
                max_years,
            });
        }
        None
    }
}

/// Structured hints first, then a fixed remote/hybrid/onsite vocabulary.
pub fn classify_work_mode(text: &str, hints: &ListingHints<'_>) -> (bool, Option<WorkMode>) {
    let inferred = || {
        let lowered = format!("{}\n{}", hints.location, text).to_lowercase();
        let mentions = |terms: &[&str]| terms.iter().any(|term| contains_term(&lowered, term));

        if mentions(&HYBRID_TERMS) {
            Some(WorkMode::Hybrid)
        } else if mentions(&REMOTE_TERMS) {
            Some(WorkMode::Remote)
        } else if mentions(&ONSITE_TERMS) {
            Some(WorkMode::Onsite)
        } else {
            None
        }
    };

    // A structured "not remote" outranks remote wording in the text.
    let work_mode = match (hints.work_mode, hints.is_remote) {
        (Some(mode), _) => Some(mode),
        (None, Some(true)) => Some(WorkMode::Remote),
        (None, Some(false)) => inferred().filter(|mode| *mode != WorkMode::Remote),
        (None, None) => inferred(),
    };

    (work_mode == Some(WorkMode::Remote), work_mode)
}
