//! Skill Curator
//!
//! Turns one reflection item (a review, a learning, or a cleanup
//! finding) into at most one mutation of the book. The model drives the
//! decision through the tool surface in [`crate::tools`]; this module
//! owns the conversation loop and its bounds. Read-only calls are free
//! within the round budget, the first successful mutating action ends
//! the item, and a model that cannot produce a valid action within the
//! budget gets cut off rather than looped forever.

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::claude::{ModelMessage, ModelRequest, ToolModel};
use crate::reflector::{Learning, SkillReview};
use crate::similarity::SimilarityIndex;
use crate::skillbook::SkillBook;
use crate::tools::{apply_action, curator_tool_schemas, ActionContext, CuratorAction};

/// Bounds and thresholds for one curation run.
#[derive(Debug, Clone)]
pub struct CurationPolicy {
    /// Model turns allowed per item.
    pub max_rounds: u32,
    /// Cosine floor for fetch_similar_skills.
    pub retrieval_threshold: f32,
    /// Result cap for fetch_similar_skills.
    pub retrieval_limit: usize,
}

impl Default for CurationPolicy {
    fn default() -> Self {
        Self {
            max_rounds: 6,
            retrieval_threshold: 0.4,
            retrieval_limit: 3,
        }
    }
}

/// One unit of work handed to the curator.
#[derive(Debug, Clone)]
pub enum CurationItem {
    /// Feedback on an existing skill.
    Review(SkillReview),
    /// A candidate new piece of knowledge.
    Learning(Learning),
    /// A finding from the cleanup pass, pre-rendered with content.
    Cleanup { instruction: String },
}

/// How an item ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurationOutcome {
    /// A mutating action succeeded; carries the tool's result message.
    Mutated { action: String, detail: String },
    /// The model concluded no change is warranted.
    NoAction { reason: String },
    /// The round budget ran out without a valid mutation.
    Aborted,
}

const SYSTEM_PROMPT: &str = r#"You curate a skill book for computer-use agents. You receive one piece of evidence at a time (a skill review, a new learning, or a cleanup finding) and decide what, if anything, to change.

Decision policy:
- create_skill: the learning is genuinely new for its domain. ALWAYS call fetch_similar_skills first; if something similar exists, prefer update or merge.
- create_domain: only when no existing domain fits the learning's scope.
- update_skill: evidence shows the existing content is wrong, incomplete, or unclear, and you know the fix.
- merge_skills: two skills in the same domain cover the same ground; write merged content that keeps the best of both.
- annotate_skill: the signal is real but too weak for a rewrite (one neutral review, an unconfirmed suspicion).
- delete_skill: the skill is harmful or its track record shows it consistently fails.
- No action: the evidence warrants nothing (a positive review of a healthy skill, a low-confidence learning, a platitude). Reply in plain text explaining why, without calling any tool.

Rules:
- At most ONE mutating action per item. Read tools (fetch_similar_skills, read_skills) are free.
- Skill descriptions are retrieval keys: one sentence, concrete, about what the skill covers.
- Situations say WHEN guidance applies in general terms; guidance gives exact menu paths, shortcuts, and steps.
- Skill and domain names are lowercase kebab-case, 3-20 characters.
- If a tool call is rejected, read the error: it lists valid alternatives. Correct and retry."#;

pub struct Curator {
    model: Arc<dyn ToolModel>,
    policy: CurationPolicy,
    tools: Vec<Value>,
}

impl Curator {
    pub fn new(model: Arc<dyn ToolModel>, policy: CurationPolicy) -> Self {
        Self {
            model,
            policy,
            tools: curator_tool_schemas(),
        }
    }

    /// Run the decision loop for one item.
    pub async fn curate_item(
        &self,
        book: &mut SkillBook,
        index: &SimilarityIndex,
        item: &CurationItem,
    ) -> Result<CurationOutcome> {
        let mut request = ModelRequest::new(SYSTEM_PROMPT).with_tools(self.tools.clone());
        request.push(ModelMessage::user(render_item(book, item)));

        let mut ctx = ActionContext {
            book,
            index,
            retrieval_threshold: self.policy.retrieval_threshold,
            retrieval_limit: self.policy.retrieval_limit,
        };

        for round in 1..=self.policy.max_rounds {
            let response = self.model.chat(&request).await?;
            let calls: Vec<(String, String, Value)> = response
                .tool_calls()
                .into_iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();

            if calls.is_empty() {
                let reason = response.text();
                info!(round, reason = %reason, "curator chose no action");
                return Ok(CurationOutcome::NoAction { reason });
            }

            request.push(ModelMessage::assistant(response.content.clone()));

            let mut mutated: Option<(String, String)> = None;
            for (call_id, name, input) in &calls {
                if mutated.is_some() {
                    request.push(ModelMessage::tool_result(
                        call_id,
                        "Item already resolved by a previous action in this turn.",
                        true,
                    ));
                    continue;
                }
                match CuratorAction::decode(name, input) {
                    Err(reason) => {
                        warn!(round, tool = %name, %reason, "rejected malformed tool call");
                        request.push(ModelMessage::tool_result(call_id, reason, true));
                    }
                    Ok(action) => match apply_action(&mut ctx, &action).await? {
                        Ok(detail) => {
                            if action.is_mutation() {
                                mutated = Some((action.name().to_string(), detail.clone()));
                            }
                            request.push(ModelMessage::tool_result(call_id, detail, false));
                        }
                        Err(domain_err) => {
                            warn!(round, tool = %name, error = %domain_err, "tool call rejected");
                            request.push(ModelMessage::tool_result(
                                call_id,
                                domain_err.to_string(),
                                true,
                            ));
                        }
                    },
                }
            }

            if let Some((action, detail)) = mutated {
                info!(round, %action, %detail, "curation item resolved");
                return Ok(CurationOutcome::Mutated { action, detail });
            }
        }

        warn!(max_rounds = self.policy.max_rounds, "curation item aborted, round budget spent");
        Ok(CurationOutcome::Aborted)
    }
}

/// Render one item as the opening user message, with enough context that
/// the model need not guess what exists.
fn render_item(book: &SkillBook, item: &CurationItem) -> String {
    match item {
        CurationItem::Review(review) => {
            let review_json =
                serde_json::to_string_pretty(review).unwrap_or_else(|_| format!("{:?}", review));
            let current = match book.get_skill(review.skill_id()) {
                Ok(skill) => skill.to_evaluation_markdown(),
                Err(_) => "<the skill no longer exists>".to_string(),
            };
            format!(
                "A task just finished. Review of skill `{}`:\n\n{}\n\n\
                 Current state of the skill:\n\n{}\n\n\
                 Decide whether this review warrants a change.",
                review.skill_id(),
                review_json,
                current
            )
        }
        CurationItem::Learning(learning) => {
            let learning_json =
                serde_json::to_string_pretty(learning).unwrap_or_else(|_| format!("{:?}", learning));
            format!(
                "A task just finished and produced a candidate learning:\n\n{}\n\n\
                 Existing domains:\n{}\n\n\
                 Decide whether this belongs in the skill book. Check for \
                 similar existing skills before creating anything.",
                learning_json,
                book.list_domains()
            )
        }
        CurationItem::Cleanup { instruction } => instruction.clone(),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedModel;
    use super::*;
    use crate::embeddings::test_support::StubEmbedder;
    use crate::reflector::{Followed, IssueType};
    use crate::skillbook::test_support::sample_book;

    fn curator_with(turns: Vec<Vec<crate::claude::ContentBlock>>) -> Curator {
        Curator::new(
            Arc::new(ScriptedModel::new(turns)),
            CurationPolicy::default(),
        )
    }

    fn stub_index() -> SimilarityIndex {
        SimilarityIndex::new(Arc::new(StubEmbedder::new(4)))
    }

    fn negative_review() -> CurationItem {
        CurationItem::Review(SkillReview::Negative {
            skill_id: "gimp/color-to-alpha".to_string(),
            followed: Followed::Yes,
            issue_type: IssueType::Incorrect,
            what_went_wrong: "The filter lives under Colors, not Layer".to_string(),
            corrected_guidance: Some("Use Colors > Color to Alpha".to_string()),
        })
    }

    #[tokio::test]
    async fn test_update_resolves_item() {
        let curator = curator_with(vec![ScriptedModel::tool_turn(
            "toolu_1",
            "update_skill",
            serde_json::json!({
                "skill_id": "gimp/color-to-alpha",
                "guidance": "Open Colors > Color to Alpha, pick the color to remove, apply."
            }),
        )]);
        let mut book = sample_book();
        let index = stub_index();

        let outcome = curator
            .curate_item(&mut book, &index, &negative_review())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CurationOutcome::Mutated { ref action, .. } if action == "update_skill"
        ));
        assert!(book
            .get_skill("gimp/color-to-alpha")
            .unwrap()
            .guidance
            .contains("Colors > Color to Alpha"));
    }

    #[tokio::test]
    async fn test_plain_text_is_no_action() {
        let curator = curator_with(vec![ScriptedModel::text_turn(
            "Positive review of a healthy skill, nothing to change.",
        )]);
        let mut book = sample_book();
        let index = stub_index();

        let outcome = curator
            .curate_item(&mut book, &index, &negative_review())
            .await
            .unwrap();
        assert!(matches!(outcome, CurationOutcome::NoAction { .. }));
    }

    #[tokio::test]
    async fn test_model_recovers_from_rejected_call() {
        // First turn targets a skill that does not exist; the error lists
        // alternatives and the scripted second turn corrects the id.
        let curator = curator_with(vec![
            ScriptedModel::tool_turn(
                "toolu_1",
                "annotate_skill",
                serde_json::json!({
                    "skill_id": "gimp/colour-to-alpha",
                    "note": "Menu path confirmed on 2.10"
                }),
            ),
            ScriptedModel::tool_turn(
                "toolu_2",
                "annotate_skill",
                serde_json::json!({
                    "skill_id": "gimp/color-to-alpha",
                    "note": "Menu path confirmed on 2.10"
                }),
            ),
        ]);
        let mut book = sample_book();
        let index = stub_index();

        let outcome = curator
            .curate_item(&mut book, &index, &negative_review())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CurationOutcome::Mutated { ref action, .. } if action == "annotate_skill"
        ));
        assert_eq!(
            book.get_skill("gimp/color-to-alpha").unwrap().annotations.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_round_budget_aborts() {
        // Every turn issues the same invalid call; the loop must stop.
        let bad_turn = || {
            ScriptedModel::tool_turn(
                "toolu_x",
                "update_skill",
                serde_json::json!({"skill_id": "gimp/no-such-skill", "guidance": "Anything at all, long enough to pass validation here."}),
            )
        };
        let curator = curator_with((0..10).map(|_| bad_turn()).collect());
        let mut book = sample_book();
        let index = stub_index();

        let outcome = curator
            .curate_item(&mut book, &index, &negative_review())
            .await
            .unwrap();
        assert_eq!(outcome, CurationOutcome::Aborted);
    }

    #[tokio::test]
    async fn test_read_then_mutate_within_budget() {
        let curator = curator_with(vec![
            ScriptedModel::tool_turn(
                "toolu_1",
                "read_skills",
                serde_json::json!({"skill_ids": ["gimp/color-to-alpha"]}),
            ),
            ScriptedModel::tool_turn(
                "toolu_2",
                "annotate_skill",
                serde_json::json!({
                    "skill_id": "gimp/color-to-alpha",
                    "note": "Works on flattened images only"
                }),
            ),
        ]);
        let mut book = sample_book();
        let index = stub_index();

        let outcome = curator
            .curate_item(&mut book, &index, &negative_review())
            .await
            .unwrap();
        assert!(matches!(outcome, CurationOutcome::Mutated { .. }));
    }

    #[tokio::test]
    async fn test_at_most_one_mutation_per_turn() {
        // Two mutating calls in one turn: only the first lands.
        let curator = Curator::new(
            Arc::new(ScriptedModel::new(vec![vec![
                crate::claude::ContentBlock::ToolUse {
                    id: "toolu_1".to_string(),
                    name: "annotate_skill".to_string(),
                    input: serde_json::json!({
                        "skill_id": "gimp/color-to-alpha",
                        "note": "First note"
                    }),
                },
                crate::claude::ContentBlock::ToolUse {
                    id: "toolu_2".to_string(),
                    name: "annotate_skill".to_string(),
                    input: serde_json::json!({
                        "skill_id": "gimp/color-to-alpha",
                        "note": "Second note"
                    }),
                },
            ]])),
            CurationPolicy::default(),
        );
        let mut book = sample_book();
        let index = stub_index();

        let outcome = curator
            .curate_item(&mut book, &index, &negative_review())
            .await
            .unwrap();
        assert!(matches!(outcome, CurationOutcome::Mutated { .. }));
        assert_eq!(
            book.get_skill("gimp/color-to-alpha").unwrap().annotations.len(),
            1
        );
    }
}
