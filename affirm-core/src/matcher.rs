//! Matcher (C4): scores a user intention against templates and the
//! affirmation pool, and decides the generation route.

use crate::library::LibraryStore;
use crate::llm::LlmClient;
use crate::rate_limiter::{rate_limit_key, RateLimiter, LLM_CLASS};
use affirm_common::db::{AffirmationLineRow, SessionTemplateRow};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;

pub const EXACT_THRESHOLD: f64 = 0.85;
pub const POOL_THRESHOLD: f64 = 0.55;
const FALLBACK_COUNT: usize = 6;
const POOL_MIN_QUALIFYING: usize = 6;
const POOL_MAX_SELECTED: usize = 10;

#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Exact { template_id: String, affirmation_ids: Vec<String>, affirmations: Vec<String>, confidence: f64 },
    Pooled { affirmation_ids: Vec<String>, affirmations: Vec<String>, confidence: f64 },
    Generated { affirmations: Vec<String>, cost: Decimal },
    Fallback { affirmations: Vec<String> },
}

impl MatchOutcome {
    pub fn affirmations(&self) -> &[String] {
        match self {
            MatchOutcome::Exact { affirmations, .. } => affirmations,
            MatchOutcome::Pooled { affirmations, .. } => affirmations,
            MatchOutcome::Generated { affirmations, .. } => affirmations,
            MatchOutcome::Fallback { affirmations } => affirmations,
        }
    }

    pub fn match_type(&self) -> crate::types::MatchType {
        match self {
            MatchOutcome::Exact { .. } => crate::types::MatchType::Exact,
            MatchOutcome::Pooled { .. } => crate::types::MatchType::Pooled,
            MatchOutcome::Generated { .. } => crate::types::MatchType::Generated,
            MatchOutcome::Fallback { .. } => crate::types::MatchType::Fallback,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            MatchOutcome::Exact { confidence, .. } => *confidence,
            MatchOutcome::Pooled { confidence, .. } => *confidence,
            MatchOutcome::Generated { .. } => 1.0,
            MatchOutcome::Fallback { .. } => 0.0,
        }
    }

    pub fn cost(&self) -> Decimal {
        match self {
            MatchOutcome::Generated { cost, .. } => *cost,
            _ => Decimal::ZERO,
        }
    }

    pub fn template_id(&self) -> Option<String> {
        match self {
            MatchOutcome::Exact { template_id, .. } => Some(template_id.clone()),
            _ => None,
        }
    }

    pub fn affirmation_ids(&self) -> Vec<String> {
        match self {
            MatchOutcome::Exact { affirmation_ids, .. } => affirmation_ids.clone(),
            MatchOutcome::Pooled { affirmation_ids, .. } => affirmation_ids.clone(),
            _ => Vec::new(),
        }
    }
}

fn order_texts_by_ids(ids: &[String], lines: &[AffirmationLineRow]) -> Vec<String> {
    ids.iter()
        .filter_map(|id| lines.iter().find(|l| &l.id == id).map(|l| l.text.clone()))
        .collect()
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// `max(keyword_coverage, token_jaccard)`: monotone in keyword overlap,
/// satisfying the boundary tests (exact at threshold, pool at threshold).
pub fn similarity(intention_tokens: &HashSet<String>, keywords: &[String], reference_text: &str) -> f64 {
    let keyword_coverage = if keywords.is_empty() {
        0.0
    } else {
        let hits = keywords
            .iter()
            .filter(|kw| intention_tokens.contains(&kw.to_lowercase()))
            .count();
        hits as f64 / keywords.len() as f64
    };

    let reference_tokens = tokenize(reference_text);
    let token_jaccard = if reference_tokens.is_empty() || intention_tokens.is_empty() {
        0.0
    } else {
        let intersection = intention_tokens.intersection(&reference_tokens).count();
        let union = intention_tokens.union(&reference_tokens).count();
        intersection as f64 / union as f64
    };

    keyword_coverage.max(token_jaccard)
}

/// Deterministic tie-break: rating desc, use-count asc, id asc.
/// Shared by both the exact and pooled paths (§4.4 states the same
/// rule twice).
pub fn tie_break_key(rating: f64, use_count: i64, id: &str) -> (std::cmp::Reverse<i64>, i64, String) {
    // rating compared as a fixed-point integer since f64 doesn't impl Ord.
    (std::cmp::Reverse((rating * 1000.0).round() as i64), use_count, id.to_string())
}

pub struct Matcher {
    library: Arc<LibraryStore>,
    llm: Option<Arc<dyn LlmClient>>,
    rate_limiter: Arc<RateLimiter>,
}

impl Matcher {
    pub fn new(library: Arc<LibraryStore>, llm: Option<Arc<dyn LlmClient>>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { library, llm, rate_limiter }
    }

    pub async fn decide(
        &self,
        intention: &str,
        goal: &str,
        is_first_session: bool,
        user_id: Option<&str>,
        ip: &str,
    ) -> Result<MatchOutcome, crate::error::ApiError> {
        let intention_tokens = tokenize(intention);

        let templates = self.library.find_templates_by_goal(goal).await?;
        if let Some((template_id, affirmation_ids, confidence)) = self.try_exact(&intention_tokens, &templates) {
            let lines = self.library.get_affirmations_by_ids(&affirmation_ids).await?;
            let affirmations = order_texts_by_ids(&affirmation_ids, &lines);
            return Ok(MatchOutcome::Exact { template_id, affirmation_ids, affirmations, confidence });
        }

        let pool = self.library.find_affirmations_by_goal(goal, 500, 0).await?;
        if !is_first_session || self.llm.is_none() {
            if let Some(outcome) = self.try_pooled(&intention_tokens, &pool) {
                return Ok(outcome);
            }
        }

        if let Some(llm) = &self.llm {
            let key = rate_limit_key(LLM_CLASS.name, user_id, ip);
            let allow = self.rate_limiter.allow(&key, LLM_CLASS.window_secs, LLM_CLASS.limit).await;
            if !allow.allowed {
                tracing::warn!("llm generation rate limited for {key}, falling back");
            } else {
                match llm.generate(goal, intention).await {
                    Ok((affirmations, cost)) => return Ok(MatchOutcome::Generated { affirmations, cost }),
                    Err(e) => {
                        tracing::warn!("LLM generation failed, falling back: {e}");
                    }
                }
            }
        }

        Ok(MatchOutcome::Fallback { affirmations: fallback_affirmations(goal) })
    }

    fn try_exact(
        &self,
        intention_tokens: &HashSet<String>,
        templates: &[SessionTemplateRow],
    ) -> Option<(String, Vec<String>, f64)> {
        let mut best: Option<(f64, &SessionTemplateRow)> = None;

        for template in templates {
            let keywords: Vec<String> = serde_json::from_str(&template.intent_keywords_json).unwrap_or_default();
            let score = similarity(intention_tokens, &keywords, &template.canonical_intent);
            let better = match best {
                None => true,
                Some((best_score, best_template)) => {
                    score > best_score
                        || (score == best_score
                            && tie_break_key(template.rating, template.use_count, &template.id)
                                < tie_break_key(best_template.rating, best_template.use_count, &best_template.id))
                }
            };
            if better {
                best = Some((score, template));
            }
        }

        let (score, template) = best?;
        if score < EXACT_THRESHOLD {
            return None;
        }

        let affirmation_ids: Vec<String> = serde_json::from_str(&template.affirmation_ids_json).unwrap_or_default();
        Some((template.id.clone(), affirmation_ids, score))
    }

    fn try_pooled(&self, intention_tokens: &HashSet<String>, pool: &[AffirmationLineRow]) -> Option<MatchOutcome> {
        let mut scored: Vec<(f64, &AffirmationLineRow)> = pool
            .iter()
            .map(|line| {
                let tags: Vec<String> = serde_json::from_str(&line.tags_json).unwrap_or_default();
                (similarity(intention_tokens, &tags, &line.text), line)
            })
            .filter(|(score, _)| *score >= POOL_THRESHOLD)
            .collect();

        if scored.len() < POOL_MIN_QUALIFYING {
            return None;
        }

        scored.sort_by(|(score_a, line_a), (score_b, line_b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap()
                .then_with(|| {
                    tie_break_key(line_a.rating.unwrap_or(0.0), line_a.use_count.unwrap_or(0), &line_a.id)
                        .cmp(&tie_break_key(line_b.rating.unwrap_or(0.0), line_b.use_count.unwrap_or(0), &line_b.id))
                })
        });

        let n = POOL_MAX_SELECTED.min(scored.len());
        let selected = &scored[..n];
        let confidence = selected.first().map(|(s, _)| *s).unwrap_or(0.0);

        Some(MatchOutcome::Pooled {
            affirmation_ids: selected.iter().map(|(_, line)| line.id.clone()).collect(),
            affirmations: selected.iter().map(|(_, line)| line.text.clone()).collect(),
            confidence,
        })
    }
}

/// A static, zero-cost list per goal, exactly 6 affirmations, used when
/// no template/pool match qualifies and no LLM is available.
pub fn fallback_affirmations(goal: &str) -> Vec<String> {
    let lines: [&str; FALLBACK_COUNT] = match goal {
        "sleep" => [
            "I release today and welcome rest.",
            "My body grows heavy and calm.",
            "I am safe and at ease.",
            "I drift gently into peaceful sleep.",
            "My mind quiets with each breath.",
            "I trust tomorrow will take care of itself.",
        ],
        "focus" => [
            "I am clear-headed and ready to work.",
            "I direct my attention with ease.",
            "My focus sharpens with every breath.",
            "I complete one task at a time.",
            "I am present with this moment's work.",
            "My mind is calm and attentive.",
        ],
        "manifest" => [
            "I attract the outcomes I am working toward.",
            "I take aligned action every day.",
            "My future is shaped by today's choices.",
            "I am worthy of the success I seek.",
            "I move forward with clarity and purpose.",
            "My goals are within reach.",
        ],
        _ => [
            "I am calm in this moment.",
            "I breathe in peace and exhale tension.",
            "I am grounded and at ease.",
            "My body and mind are relaxed.",
            "I accept this moment as it is.",
            "I release what I cannot control.",
        ],
    };
    lines.into_iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_always_returns_six() {
        for goal in ["sleep", "focus", "calm", "manifest"] {
            assert_eq!(fallback_affirmations(goal).len(), FALLBACK_COUNT);
        }
    }

    #[test]
    fn similarity_is_bounded_and_monotone() {
        let tokens = tokenize("help me finish my thesis outline today");
        let high = similarity(&tokens, &["thesis".to_string(), "outline".to_string()], "finish my thesis");
        let low = similarity(&tokens, &["unrelated".to_string()], "something else entirely");
        assert!(high > low);
        assert!((0.0..=1.0).contains(&high));
    }

    #[test]
    fn tie_break_orders_rating_desc_then_use_count_asc_then_id() {
        let a = tie_break_key(4.5, 10, "b");
        let b = tie_break_key(4.5, 5, "a");
        let c = tie_break_key(4.9, 100, "z");
        assert!(c < a);
        assert!(b < a);
    }
}
