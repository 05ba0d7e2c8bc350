//! Generated text for sessions
//!
//! Warmup/cooldown prompts, matching tags and duration prediction come from an
//! external text generator. Its failures never block a session: every call
//! falls back to `HeuristicPrompts`.

use thiserror::Error;
use tracing::warn;

use crate::models::FocusLedger;

/// Failure reported by a prompt generator
#[derive(Error, Debug)]
#[error("prompt generation failed: {0}")]
pub struct PromptError(pub String);

/// Inputs shared by every prompt request
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub intent: &'a str,
    pub topic: &'a str,
    pub duration_minutes: u32,
}

/// Inputs for choosing a session length
#[derive(Debug, Clone)]
pub struct DurationContext<'a> {
    pub topic: &'a str,
    pub min_duration: u32,
    pub max_duration: u32,
    pub history: Option<&'a FocusLedger>,
}

/// External text generator
pub trait PromptGenerator: Send + Sync {
    fn warmup_prompt(&self, ctx: &PromptContext<'_>) -> Result<String, PromptError>;

    fn cooldown_prompt(&self, ctx: &PromptContext<'_>) -> Result<String, PromptError>;

    fn matching_tags(&self, ctx: &PromptContext<'_>) -> Result<Vec<String>, PromptError>;

    fn predict_duration(&self, ctx: &DurationContext<'_>) -> Result<u32, PromptError>;
}

/// Deterministic, offline generator
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicPrompts;

impl PromptGenerator for HeuristicPrompts {
    fn warmup_prompt(&self, ctx: &PromptContext<'_>) -> Result<String, PromptError> {
        Ok(format!(
            "Take a breath. For the next {} minutes your only job is: {}. \
             Close anything unrelated to {} and write down the first small step.",
            ctx.duration_minutes, ctx.intent, ctx.topic
        ))
    }

    fn cooldown_prompt(&self, ctx: &PromptContext<'_>) -> Result<String, PromptError> {
        Ok(format!(
            "Time's up. How far did you get on \"{}\"? \
             Note one thing that went well and the next step for {}.",
            ctx.intent, ctx.topic
        ))
    }

    fn matching_tags(&self, ctx: &PromptContext<'_>) -> Result<Vec<String>, PromptError> {
        let mut tags: Vec<String> = Vec::new();
        for word in ctx.topic.split(|c: char| !c.is_alphanumeric()) {
            let word = word.to_lowercase();
            if word.len() >= 2 && !tags.contains(&word) {
                tags.push(word);
            }
        }
        Ok(tags)
    }

    fn predict_duration(&self, ctx: &DurationContext<'_>) -> Result<u32, PromptError> {
        let preferred = ctx
            .history
            .and_then(|ledger| ledger.focus_patterns.preferred_duration_range)
            .map(|(lo, hi)| (lo + hi) / 2);

        Ok(preferred.unwrap_or((ctx.min_duration + ctx.max_duration) / 2))
    }
}

/// Generator with a heuristic fallback
pub struct PromptService {
    generator: Box<dyn PromptGenerator>,
    fallback: HeuristicPrompts,
}

impl PromptService {
    pub fn new(generator: Box<dyn PromptGenerator>) -> Self {
        Self {
            generator,
            fallback: HeuristicPrompts,
        }
    }

    /// Service backed only by the heuristic
    pub fn heuristic() -> Self {
        Self::new(Box::new(HeuristicPrompts))
    }

    pub fn warmup_prompt(&self, ctx: &PromptContext<'_>) -> String {
        self.generator.warmup_prompt(ctx).unwrap_or_else(|e| {
            warn!(error = %e, "Warmup prompt fell back to heuristic");
            self.fallback.warmup_prompt(ctx).unwrap_or_default()
        })
    }

    pub fn cooldown_prompt(&self, ctx: &PromptContext<'_>) -> String {
        self.generator.cooldown_prompt(ctx).unwrap_or_else(|e| {
            warn!(error = %e, "Cooldown prompt fell back to heuristic");
            self.fallback.cooldown_prompt(ctx).unwrap_or_default()
        })
    }

    pub fn matching_tags(&self, ctx: &PromptContext<'_>) -> Vec<String> {
        self.generator.matching_tags(ctx).unwrap_or_else(|e| {
            warn!(error = %e, "Matching tags fell back to heuristic");
            self.fallback.matching_tags(ctx).unwrap_or_default()
        })
    }

    /// Chosen duration, always within `[min_duration, max_duration]`
    pub fn choose_duration(&self, ctx: &DurationContext<'_>) -> u32 {
        let predicted = self.generator.predict_duration(ctx).unwrap_or_else(|e| {
            warn!(error = %e, "Duration prediction fell back to heuristic");
            self.fallback
                .predict_duration(ctx)
                .unwrap_or(ctx.min_duration)
        });
        predicted.clamp(ctx.min_duration, ctx.max_duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    struct Offline;

    impl PromptGenerator for Offline {
        fn warmup_prompt(&self, _: &PromptContext<'_>) -> Result<String, PromptError> {
            Err(PromptError("service unavailable".into()))
        }
        fn cooldown_prompt(&self, _: &PromptContext<'_>) -> Result<String, PromptError> {
            Err(PromptError("service unavailable".into()))
        }
        fn matching_tags(&self, _: &PromptContext<'_>) -> Result<Vec<String>, PromptError> {
            Err(PromptError("service unavailable".into()))
        }
        fn predict_duration(&self, _: &DurationContext<'_>) -> Result<u32, PromptError> {
            Err(PromptError("service unavailable".into()))
        }
    }

    struct Overeager;

    impl PromptGenerator for Overeager {
        fn warmup_prompt(&self, _: &PromptContext<'_>) -> Result<String, PromptError> {
            Ok("go".into())
        }
        fn cooldown_prompt(&self, _: &PromptContext<'_>) -> Result<String, PromptError> {
            Ok("stop".into())
        }
        fn matching_tags(&self, _: &PromptContext<'_>) -> Result<Vec<String>, PromptError> {
            Ok(vec![])
        }
        fn predict_duration(&self, _: &DurationContext<'_>) -> Result<u32, PromptError> {
            Ok(500)
        }
    }

    fn ctx() -> PromptContext<'static> {
        PromptContext {
            intent: "Finish the proof",
            topic: "Linear Algebra",
            duration_minutes: 25,
        }
    }

    #[test]
    fn test_fallback_on_failure() {
        let service = PromptService::new(Box::new(Offline));
        assert!(service.warmup_prompt(&ctx()).contains("Finish the proof"));
        assert!(service.cooldown_prompt(&ctx()).contains("Linear Algebra"));
        assert_eq!(
            service.matching_tags(&ctx()),
            vec!["linear".to_string(), "algebra".to_string()]
        );

        let duration = service.choose_duration(&DurationContext {
            topic: "math",
            min_duration: 25,
            max_duration: 30,
            history: None,
        });
        assert_eq!(duration, 27);
    }

    #[test]
    fn test_prediction_is_clamped() {
        let service = PromptService::new(Box::new(Overeager));
        let duration = service.choose_duration(&DurationContext {
            topic: "math",
            min_duration: 25,
            max_duration: 30,
            history: None,
        });
        assert_eq!(duration, 30);
    }

    #[test]
    fn test_heuristic_uses_history() {
        let mut ledger = FocusLedger::new(Uuid::new_v4(), Utc::now());
        ledger.focus_patterns.preferred_duration_range = Some((40, 50));

        let service = PromptService::heuristic();
        let duration = service.choose_duration(&DurationContext {
            topic: "math",
            min_duration: 5,
            max_duration: 120,
            history: Some(&ledger),
        });
        assert_eq!(duration, 45);
    }
}
