use std::collections::BTreeSet;

use crate::error::ConfigError;
use crate::features::SkillVocabulary;
use crate::models::{AlignmentLevel, EnrichedJob, MatchResult};
use crate::profile::{ExclusionMode, Profile, ScoringRule};
use crate::text::contains_term;

/// Deterministic keyword scoring of one job against one profile.
///
/// Rules run in a fixed order: primary tier, secondary tier, bonuses,
/// penalties, exclusion, clamp, banding. No I/O, no hidden state.
#[derive(Debug, Clone)]
pub struct ProfileMatchEvaluator {
    profile: Profile,
    vocabulary: SkillVocabulary,
}

struct JobSignals<'a> {
    lowered: String,
    mentioned: BTreeSet<String>,
    extracted: &'a BTreeSet<String>,
}

impl JobSignals<'_> {
    fn has_skill(&self, skill: &str) -> bool {
        self.extracted.contains(skill) || self.mentioned.contains(skill)
    }

    fn has_term(&self, term: &str) -> bool {
        self.extracted.contains(term) || contains_term(&self.lowered, term)
    }

    fn first_trigger<'r>(&self, rule: &'r ScoringRule) -> Option<&'r str> {
        rule.triggers
            .iter()
            .map(String::as_str)
            .find(|trigger| self.has_term(trigger))
    }
}

impl ProfileMatchEvaluator {
    /// Normalizes and checks `profile` before any job is scored against it.
    pub fn new(profile: Profile) -> Result<Self, ConfigError> {
        let profile = profile.validated()?;
        let vocabulary = SkillVocabulary::from_profile(&profile);
        Ok(Self {
            profile,
            vocabulary,
        })
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn evaluate(&self, job: &EnrichedJob) -> MatchResult {
        let lowered = job.searchable_text().to_lowercase();
        let signals = JobSignals {
            mentioned: self.vocabulary.find_in(&lowered),
            lowered,
            extracted: &job.skills,
        };

        let mut score: i64 = 0;
        let mut reasons = Vec::new();
        let mut matching_skills = Vec::new();

        let weights = &self.profile.weights;
        let tiers = [
            ("primary", &self.profile.primary_skills, weights.primary_cap, true),
            ("secondary", &self.profile.secondary_skills, weights.secondary_cap, false),
        ];
        for (tier, skills, cap, primary) in tiers {
            let mut tier_total = 0u32;
            for skill in skills.iter().filter(|skill| signals.has_skill(skill)) {
                matching_skills.push(skill.clone());
                let added = self
                    .profile
                    .weight_for(skill, primary)
                    .min(cap.saturating_sub(tier_total));
                tier_total += added;
                if added > 0 {
                    reasons.push(format!("{tier} skill: {skill} (+{added})"));
                } else {
                    reasons.push(format!("{tier} skill: {skill} (+0, {tier} cap reached)"));
                }
            }
            score += i64::from(tier_total);
        }

        for rule in &self.profile.bonus_rules {
            if let Some(trigger) = signals.first_trigger(rule) {
                score += i64::from(rule.points);
                reasons.push(format!("bonus: {} (+{}) via '{trigger}'", rule.label, rule.points));
            }
        }
        for rule in &self.profile.penalty_rules {
            if let Some(trigger) = signals.first_trigger(rule) {
                score -= i64::from(rule.points);
                reasons.push(format!("penalty: {} (-{}) via '{trigger}'", rule.label, rule.points));
            }
        }

        let exclusion = self
            .profile
            .exclusion_signals
            .iter()
            .find(|signal| signals.has_term(signal));
        if let Some(signal) = exclusion {
            let ceiling = i64::from(self.profile.bands.ignore_ceiling());
            score = match self.profile.exclusion_mode {
                ExclusionMode::Zero => 0,
                ExclusionMode::Cap => score.min(ceiling),
            };
            reasons.push(format!("exclusion: {signal} (forced Ignore)"));
        }

        let score = score.clamp(0, 100) as u8;
        let level = if exclusion.is_some() {
            AlignmentLevel::Ignore
        } else {
            self.profile.bands.level_for(score)
        };

        if let Some(experience) = &job.experience {
            reasons.push(format!("experience: {experience}"));
        }

        let required = if self.profile.required_skills.is_empty() {
            self.profile.all_skills().cloned().collect::<Vec<_>>()
        } else {
            self.profile.required_skills.clone()
        };
        let missing_skills = required
            .into_iter()
            .filter(|skill| !signals.has_skill(skill) && !signals.has_term(skill))
            .collect();

        MatchResult {
            score,
            level,
            matching_skills,
            missing_skills,
            reasons,
        }
    }
}
