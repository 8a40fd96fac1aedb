//! Skill Book Data Model
//!
//! The in-memory store of procedural knowledge: domains, skills, usage
//! metrics, and annotations. All mutations validate synchronously and
//! return a typed [`SkillError`] on violation; callers persist explicitly
//! through the store module.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Allowed characters for skill and domain names.
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]*[a-z0-9]$").expect("valid regex"));

pub const NAME_MIN: usize = 3;
pub const NAME_MAX: usize = 20;
pub const DESCRIPTION_MIN: usize = 10;
pub const DESCRIPTION_MAX: usize = 300;
pub const SITUATION_MIN: usize = 10;
pub const SITUATION_MAX: usize = 600;
pub const GUIDANCE_MIN: usize = 20;
pub const GUIDANCE_MAX: usize = 5000;
pub const ANNOTATION_MAX: usize = 500;

/// Maximum number of skills a single read may request.
pub const READ_BATCH_MAX: usize = 4;

/// Typed errors for all skill book operations.
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("domain '{domain}' does not exist. Available domains:\n{available}")]
    DomainNotFound { domain: String, available: String },

    #[error("skill '{skill_id}' does not exist. Skills in domain '{domain}':\n{available}")]
    SkillNotFound {
        skill_id: String,
        domain: String,
        available: String,
    },

    #[error("domain '{0}' already exists")]
    DuplicateDomain(String),

    #[error("skill '{0}' already exists")]
    DuplicateSkill(String),

    #[error("merge rejected: {0}")]
    Merge(String),

    #[error("update of '{0}' changes nothing: provide at least one field")]
    EmptyUpdate(String),

    #[error("too many skills requested: {requested} (maximum per read is {max})")]
    BatchTooLarge { requested: usize, max: usize },
}

fn validation(field: &'static str, reason: impl Into<String>) -> SkillError {
    SkillError::Validation {
        field,
        reason: reason.into(),
    }
}

/// Validate a skill or domain name: lowercase, hyphen-separated, bounded.
pub fn validate_name(field: &'static str, name: &str) -> Result<(), SkillError> {
    let len = name.chars().count();
    if len < NAME_MIN || len > NAME_MAX {
        return Err(validation(
            field,
            format!(
                "'{}' has {} characters, allowed range is {}-{}",
                name, len, NAME_MIN, NAME_MAX
            ),
        ));
    }
    if !NAME_RE.is_match(name) {
        return Err(validation(
            field,
            format!(
                "'{}' must be lowercase letters, digits, and hyphens (e.g. 'color-to-alpha')",
                name
            ),
        ));
    }
    Ok(())
}

fn validate_len(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), SkillError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(validation(
            field,
            format!("{} characters, allowed range is {}-{}", len, min, max),
        ));
    }
    Ok(())
}

/// Usage counters for a skill. Monotonically non-decreasing; only an
/// explicit administrative reset may clear them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillMetrics {
    #[serde(default)]
    pub times_requested: u32,
    #[serde(default)]
    pub times_followed: u32,
    #[serde(default)]
    pub positive_impact: u32,
    #[serde(default)]
    pub negative_impact: u32,
    #[serde(default)]
    pub neutral_impact: u32,
}

impl SkillMetrics {
    /// Total number of impact judgements recorded.
    pub fn impact_samples(&self) -> u32 {
        self.positive_impact + self.negative_impact + self.neutral_impact
    }
}

/// A timestamped free-text note appended by a later review. Annotations
/// stage uncertain signal until the skill content is rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub timestamp: DateTime<Utc>,
    pub note: String,
}

impl Annotation {
    pub fn new(note: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            note: note.into(),
        }
    }
}

/// A unit of procedural knowledge, scoped to one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub domain: String,
    pub name: String,
    /// One-line summary used purely for semantic retrieval.
    pub description: String,
    /// When the guidance applies, in general terms.
    pub situation: String,
    /// The actionable instructions (markdown body).
    pub guidance: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub metrics: SkillMetrics,
    /// Cached vector for `description`; persisted in the embedding cache
    /// file, never in the skill file.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// Description version the cached embedding was computed from.
    #[serde(skip)]
    pub description_hash: Option<String>,
}

impl Skill {
    /// Globally unique address: `domain/name`.
    pub fn id(&self) -> String {
        format!("{}/{}", self.domain, self.name)
    }

    /// Hash of the current description, used for embedding staleness.
    pub fn current_description_hash(&self) -> String {
        description_hash(&self.description)
    }

    /// True when the cached embedding was computed from an older
    /// description (or no embedding exists). Stale skills never
    /// participate in similarity search.
    pub fn embedding_is_stale(&self) -> bool {
        match (&self.embedding, &self.description_hash) {
            (Some(_), Some(hash)) => *hash != self.current_description_hash(),
            _ => true,
        }
    }

    /// Attach a freshly computed embedding for the current description.
    pub fn attach_embedding(&mut self, embedding: Vec<f32>) {
        self.description_hash = Some(self.current_description_hash());
        self.embedding = Some(embedding);
    }

    pub fn annotate(&mut self, note: impl Into<String>) {
        self.annotations.push(Annotation::new(note));
    }

    /// Full content rendering handed to consumers and the curator.
    pub fn to_markdown(&self) -> String {
        let annotations = if self.annotations.is_empty() {
            "None".to_string()
        } else {
            self.annotations
                .iter()
                .map(|a| format!("- {}: {}", a.timestamp.format("%Y-%m-%d"), a.note))
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            "# [`{}`]\n\n{}\n\n## Context\n\n{}\n\n## Guidance\n\n{}\n\n## Annotations\n\n{}",
            self.id(),
            self.description,
            self.situation,
            self.guidance,
            annotations
        )
    }

    /// Rendering for health scans: full content plus usage counters.
    pub fn to_evaluation_markdown(&self) -> String {
        format!(
            "{}\n\n## Metrics\n\n- requested: {}\n- followed: {}\n- positive: {}\n- negative: {}\n- neutral: {}",
            self.to_markdown(),
            self.metrics.times_requested,
            self.metrics.times_followed,
            self.metrics.positive_impact,
            self.metrics.negative_impact,
            self.metrics.neutral_impact
        )
    }
}

/// Compute the retrieval-key hash for a description string.
pub fn description_hash(description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    hex::encode(hasher.finalize())
}

/// A named grouping of skills (e.g. one application).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillDomain {
    pub id: String,
    pub description: String,
}

/// Lightweight listing entry for consumers: id + retrieval description.
#[derive(Debug, Clone, Serialize)]
pub struct SkillSummary {
    pub id: String,
    pub description: String,
}

/// Partial update for a skill. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SkillUpdate {
    pub description: Option<String>,
    pub situation: Option<String>,
    pub guidance: Option<String>,
    /// Clear staged annotations that the rewrite makes obsolete.
    pub dismiss_annotations: bool,
}

/// The root aggregate: every domain and skill, plus the embedding cache.
/// The sole unit of persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkillBook {
    domains: BTreeMap<String, SkillDomain>,
    skills: BTreeMap<String, Skill>,
}

impl SkillBook {
    pub fn new() -> Self {
        Self::default()
    }

    // --- read-only consumer interface ---

    pub fn get_domain_ids(&self) -> Vec<String> {
        self.domains.keys().cloned().collect()
    }

    pub fn get_domain(&self, domain: &str) -> Result<&SkillDomain, SkillError> {
        self.domains
            .get(domain)
            .ok_or_else(|| SkillError::DomainNotFound {
                domain: domain.to_string(),
                available: self.list_domains(),
            })
    }

    /// Id + description for every skill in a domain, for retrieval menus.
    pub fn get_domain_skills(&self, domain: &str) -> Result<Vec<SkillSummary>, SkillError> {
        self.get_domain(domain)?;
        Ok(self
            .skills_in_domain(domain)
            .map(|s| SkillSummary {
                id: s.id(),
                description: s.description.clone(),
            })
            .collect())
    }

    pub fn get_all_skill_ids(&self) -> Vec<String> {
        self.skills.keys().cloned().collect()
    }

    fn missing_skill(&self, skill_id: &str) -> SkillError {
        let domain = skill_id.split('/').next().unwrap_or("").to_string();
        SkillError::SkillNotFound {
            skill_id: skill_id.to_string(),
            available: self.list_skills(&domain),
            domain,
        }
    }

    pub fn get_skill(&self, skill_id: &str) -> Result<&Skill, SkillError> {
        self.skills
            .get(skill_id)
            .ok_or_else(|| self.missing_skill(skill_id))
    }

    pub fn get_skill_mut(&mut self, skill_id: &str) -> Result<&mut Skill, SkillError> {
        // Borrow checker: build the error message before the mutable lookup.
        let err = self.missing_skill(skill_id);
        self.skills.get_mut(skill_id).ok_or(err)
    }

    /// Full content per id. Bounded batch size so a single read cannot
    /// pull the whole catalog into a prompt.
    pub fn read_skills(&self, skill_ids: &[String]) -> Result<Vec<String>, SkillError> {
        if skill_ids.len() > READ_BATCH_MAX {
            return Err(SkillError::BatchTooLarge {
                requested: skill_ids.len(),
                max: READ_BATCH_MAX,
            });
        }
        skill_ids
            .iter()
            .map(|id| self.get_skill(id).map(Skill::to_markdown))
            .collect()
    }

    pub fn skills_in_domain<'a>(&'a self, domain: &'a str) -> impl Iterator<Item = &'a Skill> {
        self.skills.values().filter(move |s| s.domain == domain)
    }

    pub fn all_skills(&self) -> impl Iterator<Item = &Skill> {
        self.skills.values()
    }

    pub fn all_skills_mut(&mut self) -> impl Iterator<Item = &mut Skill> {
        self.skills.values_mut()
    }

    pub fn domains(&self) -> impl Iterator<Item = &SkillDomain> {
        self.domains.values()
    }

    pub fn skill_count(&self) -> usize {
        self.skills.len()
    }

    /// Markdown bullet list of domains, used in fetch-error messages so a
    /// calling decision-maker can self-correct.
    pub fn list_domains(&self) -> String {
        if self.domains.is_empty() {
            return "<no domains exist yet>".to_string();
        }
        self.domains
            .values()
            .map(|d| format!("- `{}`: {}", d.id, d.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn list_skills(&self, domain: &str) -> String {
        let listing: Vec<String> = self
            .skills_in_domain(domain)
            .map(|s| format!("- `{}`: {}", s.id(), s.description))
            .collect();
        if listing.is_empty() {
            format!("<no skills in domain '{}'>", domain)
        } else {
            listing.join("\n")
        }
    }

    // --- mutations (curation lifecycle only) ---

    pub fn create_domain(
        &mut self,
        id: &str,
        description: &str,
    ) -> Result<&SkillDomain, SkillError> {
        validate_name("domain", id)?;
        validate_len("domain description", description, DESCRIPTION_MIN, DESCRIPTION_MAX)?;
        if self.domains.contains_key(id) {
            return Err(SkillError::DuplicateDomain(id.to_string()));
        }
        self.domains.insert(
            id.to_string(),
            SkillDomain {
                id: id.to_string(),
                description: description.to_string(),
            },
        );
        Ok(&self.domains[id])
    }

    pub fn create_skill(
        &mut self,
        domain: &str,
        name: &str,
        description: &str,
        situation: &str,
        guidance: &str,
    ) -> Result<&Skill, SkillError> {
        self.get_domain(domain)?;
        validate_name("skill name", name)?;
        validate_len("description", description, DESCRIPTION_MIN, DESCRIPTION_MAX)?;
        validate_len("situation", situation, SITUATION_MIN, SITUATION_MAX)?;
        validate_len("guidance", guidance, GUIDANCE_MIN, GUIDANCE_MAX)?;

        let id = format!("{}/{}", domain, name);
        if self.skills.contains_key(&id) {
            return Err(SkillError::DuplicateSkill(id));
        }

        let skill = Skill {
            domain: domain.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            situation: situation.to_string(),
            guidance: guidance.to_string(),
            annotations: Vec::new(),
            metrics: SkillMetrics::default(),
            embedding: None,
            description_hash: None,
        };
        self.skills.insert(id.clone(), skill);
        Ok(&self.skills[&id])
    }

    /// Partial field replacement. Untouched fields, metrics, and the
    /// domain binding are preserved. Changing the description leaves the
    /// cached embedding in place but stale.
    pub fn update_skill(
        &mut self,
        skill_id: &str,
        update: SkillUpdate,
    ) -> Result<Vec<String>, SkillError> {
        if update.description.is_none() && update.situation.is_none() && update.guidance.is_none()
        {
            return Err(SkillError::EmptyUpdate(skill_id.to_string()));
        }
        if let Some(d) = &update.description {
            validate_len("description", d, DESCRIPTION_MIN, DESCRIPTION_MAX)?;
        }
        if let Some(s) = &update.situation {
            validate_len("situation", s, SITUATION_MIN, SITUATION_MAX)?;
        }
        if let Some(g) = &update.guidance {
            validate_len("guidance", g, GUIDANCE_MIN, GUIDANCE_MAX)?;
        }

        let skill = self.get_skill_mut(skill_id)?;
        let mut changes = Vec::new();
        if let Some(d) = update.description {
            skill.description = d;
            changes.push("description replaced".to_string());
        }
        if let Some(s) = update.situation {
            skill.situation = s;
            changes.push("situation replaced".to_string());
        }
        if let Some(g) = update.guidance {
            skill.guidance = g;
            changes.push("guidance replaced".to_string());
        }
        if update.dismiss_annotations && !skill.annotations.is_empty() {
            changes.push(format!("{} annotations dismissed", skill.annotations.len()));
            skill.annotations.clear();
        }
        Ok(changes)
    }

    /// Collapse `source_id` into `target_id`: the target receives the
    /// combined content and both usage histories, the source is deleted.
    pub fn merge_skills(
        &mut self,
        source_id: &str,
        target_id: &str,
        description: &str,
        situation: &str,
        guidance: &str,
        dismiss_annotations: bool,
    ) -> Result<(), SkillError> {
        if source_id == target_id {
            return Err(SkillError::Merge(
                "source and target are the same skill".to_string(),
            ));
        }
        let source = self.get_skill(source_id)?.clone();
        let target = self.get_skill(target_id)?;
        if source.domain != target.domain {
            return Err(SkillError::Merge(format!(
                "'{}' and '{}' are in different domains; move knowledge explicitly instead",
                source_id, target_id
            )));
        }

        self.update_skill(
            target_id,
            SkillUpdate {
                description: Some(description.to_string()),
                situation: Some(situation.to_string()),
                guidance: Some(guidance.to_string()),
                dismiss_annotations,
            },
        )?;

        // Fold the source's usage history into the survivor so counters
        // stay monotone across the merge.
        let target = self.get_skill_mut(target_id)?;
        target.metrics.times_requested += source.metrics.times_requested;
        target.metrics.times_followed += source.metrics.times_followed;
        target.metrics.positive_impact += source.metrics.positive_impact;
        target.metrics.negative_impact += source.metrics.negative_impact;
        target.metrics.neutral_impact += source.metrics.neutral_impact;

        self.skills.remove(source_id);
        Ok(())
    }

    pub fn annotate_skill(&mut self, skill_id: &str, note: &str) -> Result<(), SkillError> {
        validate_len("annotation", note, 1, ANNOTATION_MAX)?;
        self.get_skill_mut(skill_id)?.annotate(note);
        Ok(())
    }

    pub fn delete_skill(&mut self, skill_id: &str) -> Result<Skill, SkillError> {
        let err = self.missing_skill(skill_id);
        self.skills.remove(skill_id).ok_or(err)
    }

    /// Reinsert a skill loaded from disk. Bypasses creation validation
    /// (the file is the source of truth) but still requires the domain
    /// and rejects duplicate ids.
    pub(crate) fn insert_loaded(&mut self, skill: Skill) -> Result<(), SkillError> {
        self.get_domain(&skill.domain)?;
        let id = skill.id();
        if self.skills.contains_key(&id) {
            return Err(SkillError::DuplicateSkill(id));
        }
        self.skills.insert(id, skill);
        Ok(())
    }

    pub(crate) fn insert_loaded_domain(&mut self, domain: SkillDomain) {
        self.domains.insert(domain.id.clone(), domain);
    }
}
