//! Trajectory Reflector
//!
//! One stateless inference call per finished task: given the trajectory
//! and the skills that were fetched during it, produce a typed review
//! per fetched skill plus any newly discovered learnings. The reflector
//! never mutates the store; metric application is a separate, explicit
//! function so it can be tested without a model in the loop.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::claude::{extract_json, ModelMessage, ModelRequest, ToolModel};
use crate::skillbook::{SkillBook, SkillError};

/// Whether the agent acted on a fetched skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Followed {
    Yes,
    Partially,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// Guidance was wrong
    Incorrect,
    /// Missing steps
    Incomplete,
    /// Confusing or ambiguous
    Unclear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeutralReason {
    NotNeeded,
    Marginal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFollowedReason {
    Irrelevant,
    ChoseAlternative,
    SeemedWrong,
}

/// Feedback on one skill that was fetched during the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SkillReview {
    /// Followed and helped succeed.
    Positive {
        skill_id: String,
        followed: Followed,
        what_helped: String,
    },
    /// Followed but caused friction or errors.
    Negative {
        skill_id: String,
        followed: Followed,
        issue_type: IssueType,
        what_went_wrong: String,
        /// The approach that actually worked, if discovered.
        #[serde(default)]
        corrected_guidance: Option<String>,
    },
    /// Followed with no meaningful effect.
    Neutral {
        skill_id: String,
        followed: Followed,
        reason: NeutralReason,
        #[serde(default)]
        suggested_improvement: Option<String>,
    },
    /// Fetched but ignored.
    NotFollowed {
        skill_id: String,
        reason: NotFollowedReason,
        explanation: String,
    },
}

impl SkillReview {
    pub fn skill_id(&self) -> &str {
        match self {
            Self::Positive { skill_id, .. }
            | Self::Negative { skill_id, .. }
            | Self::Neutral { skill_id, .. }
            | Self::NotFollowed { skill_id, .. } => skill_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// A candidate piece of new guidance extracted from the trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Learning {
    /// Knowledge found only after wasted steps.
    Friction {
        what_happened: String,
        why_it_matters: String,
        /// 'general', 'os', or an application domain
        scope: String,
        situation: String,
        guidance: String,
        confidence: Confidence,
        /// Actions spent struggling before the solution
        steps_wasted: u32,
    },
    /// Knowledge noticed without struggle.
    Discovered {
        what_happened: String,
        why_it_matters: String,
        scope: String,
        situation: String,
        guidance: String,
        confidence: Confidence,
    },
}

impl Learning {
    pub fn scope(&self) -> &str {
        match self {
            Self::Friction { scope, .. } | Self::Discovered { scope, .. } => scope,
        }
    }

    pub fn situation(&self) -> &str {
        match self {
            Self::Friction { situation, .. } | Self::Discovered { situation, .. } => situation,
        }
    }

    pub fn guidance(&self) -> &str {
        match self {
            Self::Friction { guidance, .. } | Self::Discovered { guidance, .. } => guidance,
        }
    }

    pub fn confidence(&self) -> Confidence {
        match self {
            Self::Friction { confidence, .. } | Self::Discovered { confidence, .. } => *confidence,
        }
    }
}

/// Complete reflection on one trajectory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrajectoryReflection {
    #[serde(default)]
    pub skill_reviews: Vec<SkillReview>,
    #[serde(default)]
    pub learnings: Vec<Learning>,
}

const SYSTEM_PROMPT: &str = r#"You review finished computer-use trajectories and extract reusable knowledge for a skill book that helps less capable agents.

Respond with ONLY a JSON object, no markdown fences, matching:

{
  "skill_reviews": [
    {"outcome": "positive", "skill_id": "...", "followed": "yes|partially", "what_helped": "..."},
    {"outcome": "negative", "skill_id": "...", "followed": "yes|partially", "issue_type": "incorrect|incomplete|unclear", "what_went_wrong": "...", "corrected_guidance": "... or null"},
    {"outcome": "neutral", "skill_id": "...", "followed": "yes|partially", "reason": "not_needed|marginal", "suggested_improvement": "... or null"},
    {"outcome": "not_followed", "skill_id": "...", "reason": "irrelevant|chose_alternative|seemed_wrong", "explanation": "..."}
  ],
  "learnings": [
    {"type": "friction", "what_happened": "...", "why_it_matters": "...", "scope": "general|os|<application>", "situation": "...", "guidance": "...", "confidence": "low|medium|high", "steps_wasted": 3},
    {"type": "discovered", "what_happened": "...", "why_it_matters": "...", "scope": "...", "situation": "...", "guidance": "...", "confidence": "low|medium|high"}
  ]
}

Rules:
- Provide exactly one review per fetched skill listed in the task; none for skills that were not fetched.
- Learnings must come from observed friction (struggling, retries, wasted steps) or a genuine discovery. Basic computer knowledge and generic platitudes are never learnings.
- Situation describes WHEN the guidance applies in general terms, not the specific task. Guidance is concrete: exact menu paths, shortcuts, UI elements, numbered steps.
- Empty lists are valid and expected for smooth runs."#;

/// Converts one finished trajectory into structured feedback.
pub struct Reflector {
    model: Arc<dyn ToolModel>,
}

impl Reflector {
    pub fn new(model: Arc<dyn ToolModel>) -> Self {
        Self { model }
    }

    /// Single inference call. Reviews for skills that were not actually
    /// fetched are dropped: the oracle is untrusted.
    pub async fn reflect(
        &self,
        book: &SkillBook,
        trajectory: &str,
        fetched_skill_ids: &[String],
    ) -> Result<TrajectoryReflection> {
        let skills_section = if fetched_skill_ids.is_empty() {
            "<no skills were fetched>".to_string()
        } else {
            fetched_skill_ids
                .iter()
                .map(|id| match book.get_skill(id) {
                    Ok(skill) => format!("- `{}`: {}", id, skill.description),
                    Err(_) => format!("- `{}`: <deleted since the run>", id),
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = format!(
            "## Trajectory\n\n{}\n\n## Skills fetched during this task\n\n{}\n\n\
             Review each fetched skill and extract any new learnings.",
            trajectory, skills_section
        );

        let mut request = ModelRequest::new(SYSTEM_PROMPT);
        request.push(ModelMessage::user(prompt));
        let response = self.model.chat(&request).await?;

        let text = response.text();
        let json = extract_json(&text)
            .context("reflection response contained no JSON object")?;
        let mut reflection: TrajectoryReflection =
            serde_json::from_str(json).context("reflection JSON did not match schema")?;

        reflection.skill_reviews.retain(|review| {
            let known = fetched_skill_ids.iter().any(|id| id == review.skill_id());
            if !known {
                warn!(skill_id = review.skill_id(), "dropping review for a skill that was not fetched");
            }
            known
        });
        reflection.learnings.retain(|learning| match learning {
            Learning::Friction { steps_wasted: 0, .. } => {
                warn!("dropping friction learning with zero wasted steps");
                false
            }
            _ => true,
        });

        info!(
            reviews = reflection.skill_reviews.len(),
            learnings = reflection.learnings.len(),
            "trajectory reflection parsed"
        );
        Ok(reflection)
    }
}

/// Bump usage counters for one review. Counters only ever increase:
/// every review counts a request, following counts once, and exactly one
/// impact bucket is incremented (not-followed lands in neutral).
pub fn apply_review_metrics(book: &mut SkillBook, review: &SkillReview) -> Result<(), SkillError> {
    let skill = book.get_skill_mut(review.skill_id())?;
    skill.metrics.times_requested += 1;
    match review {
        SkillReview::Positive { .. } => {
            skill.metrics.times_followed += 1;
            skill.metrics.positive_impact += 1;
        }
        SkillReview::Negative { .. } => {
            skill.metrics.times_followed += 1;
            skill.metrics.negative_impact += 1;
        }
        SkillReview::Neutral { .. } => {
            skill.metrics.times_followed += 1;
            skill.metrics.neutral_impact += 1;
        }
        SkillReview::NotFollowed { .. } => {
            skill.metrics.neutral_impact += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skillbook::test_support::sample_book;

    #[test]
    fn test_review_deserializes_from_tagged_json() {
        let raw = serde_json::json!({
            "outcome": "negative",
            "skill_id": "gimp/color-to-alpha",
            "followed": "yes",
            "issue_type": "incorrect",
            "what_went_wrong": "Menu path has moved in 2.10",
            "corrected_guidance": "Use Colors > Color to Alpha instead"
        });
        let review: SkillReview = serde_json::from_value(raw).unwrap();
        match review {
            SkillReview::Negative {
                issue_type,
                corrected_guidance,
                ..
            } => {
                assert_eq!(issue_type, IssueType::Incorrect);
                assert!(corrected_guidance.is_some());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_learning_deserializes_from_tagged_json() {
        let raw = serde_json::json!({
            "type": "friction",
            "what_happened": "Spent many actions hunting for the export option",
            "why_it_matters": "Export is hidden under File, not Save",
            "scope": "gimp",
            "situation": "Saving an image in a non-native format",
            "guidance": "Use File > Export As, not File > Save As",
            "confidence": "high",
            "steps_wasted": 6
        });
        let learning: Learning = serde_json::from_value(raw).unwrap();
        assert_eq!(learning.scope(), "gimp");
        assert_eq!(learning.confidence(), Confidence::High);
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::Medium >= Confidence::Medium);
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Low < Confidence::Medium);
    }

    #[test]
    fn test_apply_review_metrics_negative() {
        let mut book = sample_book();
        let review = SkillReview::Negative {
            skill_id: "gimp/color-to-alpha".to_string(),
            followed: Followed::Yes,
            issue_type: IssueType::Incomplete,
            what_went_wrong: "Missing the alpha channel prerequisite".to_string(),
            corrected_guidance: None,
        };
        apply_review_metrics(&mut book, &review).unwrap();
        let m = &book.get_skill("gimp/color-to-alpha").unwrap().metrics;
        assert_eq!(m.times_requested, 1);
        assert_eq!(m.times_followed, 1);
        assert_eq!(m.negative_impact, 1);
        assert_eq!(m.positive_impact, 0);
    }

    #[test]
    fn test_apply_review_metrics_not_followed() {
        let mut book = sample_book();
        let review = SkillReview::NotFollowed {
            skill_id: "gimp/color-to-alpha".to_string(),
            reason: NotFollowedReason::Irrelevant,
            explanation: "Task did not involve transparency".to_string(),
        };
        apply_review_metrics(&mut book, &review).unwrap();
        let m = &book.get_skill("gimp/color-to-alpha").unwrap().metrics;
        assert_eq!(m.times_requested, 1);
        assert_eq!(m.times_followed, 0);
        assert_eq!(m.neutral_impact, 1);
    }

    #[test]
    fn test_metrics_monotone_across_reviews() {
        let mut book = sample_book();
        let reviews = vec![
            SkillReview::Positive {
                skill_id: "gimp/color-to-alpha".to_string(),
                followed: Followed::Partially,
                what_helped: "Pointed at the right filter straight away".to_string(),
            },
            SkillReview::NotFollowed {
                skill_id: "gimp/color-to-alpha".to_string(),
                reason: NotFollowedReason::ChoseAlternative,
                explanation: "Used the eraser tool instead".to_string(),
            },
        ];
        let mut last_requested = 0;
        for review in &reviews {
            apply_review_metrics(&mut book, review).unwrap();
            let requested = book
                .get_skill("gimp/color-to-alpha")
                .unwrap()
                .metrics
                .times_requested;
            assert!(requested > last_requested);
            last_requested = requested;
        }
        assert_eq!(last_requested, 2);
    }
}
