//! Curator Tool Surface
//!
//! The tool schemas the curator exposes to the model, the closed
//! [`CuratorAction`] set those calls decode into, and the executor that
//! applies a decoded action to the book. Decode is strict: an
//! unrecognized tool name or a payload that does not match the schema
//! is rejected before anything touches the store.

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::similarity::SimilarityIndex;
use crate::skillbook::{SkillBook, SkillError, SkillUpdate};

/// JSON Schema builder for one tool definition.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    name: String,
    description: String,
    properties: Value,
    required: Vec<String>,
}

impl ToolSchema {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            properties: serde_json::json!({}),
            required: vec![],
        }
    }

    pub fn string_param(mut self, name: &str, description: &str, required: bool) -> Self {
        self.properties[name] = serde_json::json!({
            "type": "string",
            "description": description
        });
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn bool_param(mut self, name: &str, description: &str) -> Self {
        self.properties[name] = serde_json::json!({
            "type": "boolean",
            "description": description
        });
        self
    }

    pub fn string_array_param(mut self, name: &str, description: &str) -> Self {
        self.properties[name] = serde_json::json!({
            "type": "array",
            "items": {"type": "string"},
            "description": description
        });
        self.required.push(name.to_string());
        self
    }

    /// Render in Anthropic messages-API tool format.
    pub fn to_claude(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": {
                "type": "object",
                "properties": self.properties,
                "required": self.required
            }
        })
    }
}

/// The full tool surface offered to the curator model.
pub fn curator_tool_schemas() -> Vec<Value> {
    vec![
        ToolSchema::new(
            "fetch_similar_skills",
            "Find existing skills in a domain whose descriptions are semantically similar to a query. Use this before creating a skill to check for overlap.",
        )
        .string_param("domain", "Domain to search in", true)
        .string_param("query", "What the candidate skill is about", true)
        .to_claude(),
        ToolSchema::new(
            "read_skills",
            "Read the full content of up to 4 skills by id ('domain/name').",
        )
        .string_array_param("skill_ids", "Skill ids to read, at most 4")
        .to_claude(),
        ToolSchema::new(
            "create_domain",
            "Create a new skill domain. Only when no existing domain fits.",
        )
        .string_param("id", "Domain id: lowercase kebab-case, 3-20 chars", true)
        .string_param("description", "What kinds of skills belong here", true)
        .to_claude(),
        ToolSchema::new("create_skill", "Create a new skill in an existing domain.")
            .string_param("domain", "Domain the skill belongs to", true)
            .string_param("name", "Skill name: lowercase kebab-case, 3-20 chars", true)
            .string_param("description", "One-sentence summary used for retrieval", true)
            .string_param("situation", "When this skill applies, in general terms", true)
            .string_param("guidance", "Concrete steps: menu paths, shortcuts, UI elements", true)
            .to_claude(),
        ToolSchema::new(
            "update_skill",
            "Rewrite parts of an existing skill. Provide only the fields that change.",
        )
        .string_param("skill_id", "Skill to update ('domain/name')", true)
        .string_param("description", "Replacement description", false)
        .string_param("situation", "Replacement situation", false)
        .string_param("guidance", "Replacement guidance", false)
        .bool_param(
            "dismiss_annotations",
            "Clear staged annotations the rewrite makes obsolete (default true)",
        )
        .to_claude(),
        ToolSchema::new(
            "annotate_skill",
            "Attach a short dated note to a skill without rewriting it. For observations not yet worth a full update.",
        )
        .string_param("skill_id", "Skill to annotate", true)
        .string_param("note", "The observation, at most 500 chars", true)
        .to_claude(),
        ToolSchema::new(
            "merge_skills",
            "Fold two overlapping skills in the same domain into one. The merged content replaces the target; the source is deleted.",
        )
        .string_param("source_id", "Skill that will be deleted", true)
        .string_param("target_id", "Skill that receives the merged content", true)
        .string_param("description", "Merged description", true)
        .string_param("situation", "Merged situation", true)
        .string_param("guidance", "Merged guidance", true)
        .bool_param(
            "dismiss_annotations",
            "Clear the target's staged annotations (default true)",
        )
        .to_claude(),
        ToolSchema::new(
            "delete_skill",
            "Remove a skill that is wrong, harmful, or consistently useless.",
        )
        .string_param("skill_id", "Skill to delete", true)
        .to_claude(),
    ]
}

fn default_dismiss() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct FetchSimilarInput {
    domain: String,
    query: String,
}

#[derive(Debug, Deserialize)]
struct ReadSkillsInput {
    skill_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CreateDomainInput {
    id: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct CreateSkillInput {
    domain: String,
    name: String,
    description: String,
    situation: String,
    guidance: String,
}

#[derive(Debug, Deserialize)]
struct UpdateSkillInput {
    skill_id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    situation: Option<String>,
    #[serde(default)]
    guidance: Option<String>,
    #[serde(default = "default_dismiss")]
    dismiss_annotations: bool,
}

#[derive(Debug, Deserialize)]
struct AnnotateSkillInput {
    skill_id: String,
    note: String,
}

#[derive(Debug, Deserialize)]
struct MergeSkillsInput {
    source_id: String,
    target_id: String,
    description: String,
    situation: String,
    guidance: String,
    #[serde(default = "default_dismiss")]
    dismiss_annotations: bool,
}

#[derive(Debug, Deserialize)]
struct DeleteSkillInput {
    skill_id: String,
}

/// Every action the curator model can take. Anything outside this set
/// fails to decode and never executes.
#[derive(Debug)]
pub enum CuratorAction {
    FetchSimilarSkills { domain: String, query: String },
    ReadSkills { skill_ids: Vec<String> },
    CreateDomain { id: String, description: String },
    CreateSkill {
        domain: String,
        name: String,
        description: String,
        situation: String,
        guidance: String,
    },
    UpdateSkill {
        skill_id: String,
        update: SkillUpdate,
    },
    AnnotateSkill { skill_id: String, note: String },
    MergeSkills {
        source_id: String,
        target_id: String,
        description: String,
        situation: String,
        guidance: String,
        dismiss_annotations: bool,
    },
    DeleteSkill { skill_id: String },
}

impl CuratorAction {
    /// Strict decode of one tool call. The error string goes back to the
    /// model as a recoverable tool error.
    pub fn decode(name: &str, input: &Value) -> Result<Self, String> {
        fn parse<T: serde::de::DeserializeOwned>(name: &str, input: &Value) -> Result<T, String> {
            serde_json::from_value(input.clone())
                .map_err(|e| format!("invalid arguments for {}: {}", name, e))
        }

        match name {
            "fetch_similar_skills" => {
                let p: FetchSimilarInput = parse(name, input)?;
                Ok(Self::FetchSimilarSkills {
                    domain: p.domain,
                    query: p.query,
                })
            }
            "read_skills" => {
                let p: ReadSkillsInput = parse(name, input)?;
                Ok(Self::ReadSkills {
                    skill_ids: p.skill_ids,
                })
            }
            "create_domain" => {
                let p: CreateDomainInput = parse(name, input)?;
                Ok(Self::CreateDomain {
                    id: p.id,
                    description: p.description,
                })
            }
            "create_skill" => {
                let p: CreateSkillInput = parse(name, input)?;
                Ok(Self::CreateSkill {
                    domain: p.domain,
                    name: p.name,
                    description: p.description,
                    situation: p.situation,
                    guidance: p.guidance,
                })
            }
            "update_skill" => {
                let p: UpdateSkillInput = parse(name, input)?;
                Ok(Self::UpdateSkill {
                    skill_id: p.skill_id,
                    update: SkillUpdate {
                        description: p.description,
                        situation: p.situation,
                        guidance: p.guidance,
                        dismiss_annotations: p.dismiss_annotations,
                    },
                })
            }
            "annotate_skill" => {
                let p: AnnotateSkillInput = parse(name, input)?;
                Ok(Self::AnnotateSkill {
                    skill_id: p.skill_id,
                    note: p.note,
                })
            }
            "merge_skills" => {
                let p: MergeSkillsInput = parse(name, input)?;
                Ok(Self::MergeSkills {
                    source_id: p.source_id,
                    target_id: p.target_id,
                    description: p.description,
                    situation: p.situation,
                    guidance: p.guidance,
                    dismiss_annotations: p.dismiss_annotations,
                })
            }
            "delete_skill" => {
                let p: DeleteSkillInput = parse(name, input)?;
                Ok(Self::DeleteSkill {
                    skill_id: p.skill_id,
                })
            }
            other => Err(format!("unknown tool: {}", other)),
        }
    }

    /// Mutating actions end a curation item; read-only ones do not.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::FetchSimilarSkills { .. } | Self::ReadSkills { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchSimilarSkills { .. } => "fetch_similar_skills",
            Self::ReadSkills { .. } => "read_skills",
            Self::CreateDomain { .. } => "create_domain",
            Self::CreateSkill { .. } => "create_skill",
            Self::UpdateSkill { .. } => "update_skill",
            Self::AnnotateSkill { .. } => "annotate_skill",
            Self::MergeSkills { .. } => "merge_skills",
            Self::DeleteSkill { .. } => "delete_skill",
        }
    }
}

/// Everything an action needs to run against.
pub struct ActionContext<'a> {
    pub book: &'a mut SkillBook,
    pub index: &'a SimilarityIndex,
    pub retrieval_threshold: f32,
    pub retrieval_limit: usize,
}

/// Apply one decoded action. The outer error is infrastructure (embedder
/// down) and aborts the item; the inner is a domain rejection that goes
/// back to the model as a recoverable tool error.
pub async fn apply_action(
    ctx: &mut ActionContext<'_>,
    action: &CuratorAction,
) -> Result<Result<String, SkillError>> {
    debug!(action = action.name(), "applying curator action");
    match action {
        CuratorAction::FetchSimilarSkills { domain, query } => {
            if let Err(e) = ctx.book.get_domain(domain) {
                return Ok(Err(e));
            }
            let matches = ctx
                .index
                .find_similar(
                    ctx.book,
                    domain,
                    query,
                    ctx.retrieval_threshold,
                    ctx.retrieval_limit,
                )
                .await?;
            if matches.is_empty() {
                return Ok(Ok(format!(
                    "No skills in '{}' are similar to that query.",
                    domain
                )));
            }
            let body = matches
                .iter()
                .map(|m| format!("(similarity {:.2})\n{}", m.similarity, m.content))
                .collect::<Vec<_>>()
                .join("\n\n---\n\n");
            Ok(Ok(body))
        }
        CuratorAction::ReadSkills { skill_ids } => Ok(ctx
            .book
            .read_skills(skill_ids)
            .map(|rendered| rendered.join("\n\n---\n\n"))),
        CuratorAction::CreateDomain { id, description } => Ok(ctx
            .book
            .create_domain(id, description)
            .map(|d| format!("Created domain `{}`.", d.id))),
        CuratorAction::CreateSkill {
            domain,
            name,
            description,
            situation,
            guidance,
        } => Ok(ctx
            .book
            .create_skill(domain, name, description, situation, guidance)
            .map(|s| format!("Created skill `{}`.", s.id()))),
        CuratorAction::UpdateSkill { skill_id, update } => Ok(ctx
            .book
            .update_skill(skill_id, update.clone())
            .map(|changes| format!("Updated `{}`: {}.", skill_id, changes.join(", ")))),
        CuratorAction::AnnotateSkill { skill_id, note } => Ok(ctx
            .book
            .annotate_skill(skill_id, note)
            .map(|_| format!("Annotated `{}`.", skill_id))),
        CuratorAction::MergeSkills {
            source_id,
            target_id,
            description,
            situation,
            guidance,
            dismiss_annotations,
        } => Ok(ctx
            .book
            .merge_skills(
                source_id,
                target_id,
                description,
                situation,
                guidance,
                *dismiss_annotations,
            )
            .map(|_| format!("Merged `{}` into `{}`.", source_id, target_id))),
        CuratorAction::DeleteSkill { skill_id } => Ok(ctx
            .book
            .delete_skill(skill_id)
            .map(|_| format!("Deleted `{}`.", skill_id))),
    }
}
