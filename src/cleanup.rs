//! Catalog Cleanup Pass
//!
//! Periodic health scan over the whole book. Three detectors per
//! domain: near-duplicate description pairs, skills whose impact record
//! is dominated by negative reviews, and skills that keep getting
//! fetched but never followed. Findings become curation items; the scan
//! itself never mutates, so a clean book costs zero model calls.

use anyhow::Result;
use tracing::info;

use crate::curator::{CurationItem, CurationOutcome, Curator};
use crate::similarity::SimilarityIndex;
use crate::skillbook::{Skill, SkillBook};

#[derive(Debug, Clone)]
pub struct CleanupPolicy {
    /// Cosine floor above which two descriptions count as duplicates.
    pub dedup_threshold: f32,
    /// Impact samples required before the negative ratio is trusted.
    pub min_impact_samples: u32,
    /// Negative share that flags a skill.
    pub negative_ratio: f32,
    /// Requests required before the follow rate is trusted.
    pub min_requests: u32,
    /// Follow rate below which a skill is flagged as ignored.
    pub follow_rate_floor: f32,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            dedup_threshold: 0.85,
            min_impact_samples: 3,
            negative_ratio: 0.5,
            min_requests: 5,
            follow_rate_floor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingKind {
    NearDuplicate,
    NegativeHeavy,
    LowFollowRate,
}

/// One flagged condition, with the instruction handed to the curator.
#[derive(Debug, Clone)]
pub struct CleanupFinding {
    pub kind: FindingKind,
    pub domain: String,
    pub instruction: String,
}

impl CleanupFinding {
    pub fn into_item(self) -> CurationItem {
        CurationItem::Cleanup {
            instruction: self.instruction,
        }
    }
}

fn is_negative_heavy(skill: &Skill, policy: &CleanupPolicy) -> bool {
    let samples = skill.metrics.impact_samples();
    samples >= policy.min_impact_samples
        && skill.metrics.negative_impact as f32 / samples as f32 >= policy.negative_ratio
}

fn has_low_follow_rate(skill: &Skill, policy: &CleanupPolicy) -> bool {
    skill.metrics.times_requested >= policy.min_requests
        && (skill.metrics.times_followed as f32 / skill.metrics.times_requested as f32)
            < policy.follow_rate_floor
}

/// Scan every domain and collect findings. Embeddings must already be
/// fresh; stale skills are silently excluded from the pair scan.
pub fn scan(
    book: &SkillBook,
    index: &SimilarityIndex,
    policy: &CleanupPolicy,
) -> Result<Vec<CleanupFinding>> {
    let mut findings = Vec::new();

    for domain in book.get_domain_ids() {
        for pair in index.find_similar_pairs(book, &domain, policy.dedup_threshold)? {
            let first = book.get_skill(&pair.first)?;
            let second = book.get_skill(&pair.second)?;
            findings.push(CleanupFinding {
                kind: FindingKind::NearDuplicate,
                domain: domain.clone(),
                instruction: format!(
                    "Cleanup scan: skills `{}` and `{}` have near-duplicate \
                     descriptions (similarity {:.2}).\n\n{}\n\n---\n\n{}\n\n\
                     If they cover the same ground, merge them into one skill \
                     with generalized content. If they are genuinely distinct, \
                     update one description so the two stop colliding in \
                     retrieval.",
                    pair.first,
                    pair.second,
                    pair.similarity,
                    first.to_evaluation_markdown(),
                    second.to_evaluation_markdown()
                ),
            });
        }

        for skill in book.skills_in_domain(&domain) {
            if is_negative_heavy(skill, policy) {
                findings.push(CleanupFinding {
                    kind: FindingKind::NegativeHeavy,
                    domain: domain.clone(),
                    instruction: format!(
                        "Cleanup scan: skill `{}` has a mostly negative track \
                         record ({} negative of {} impact samples).\n\n{}\n\n\
                         Reassess it: fix the content if the failure mode is \
                         known, or delete it if it is misleading agents.",
                        skill.id(),
                        skill.metrics.negative_impact,
                        skill.metrics.impact_samples(),
                        skill.to_evaluation_markdown()
                    ),
                });
            }
            if has_low_follow_rate(skill, policy) {
                findings.push(CleanupFinding {
                    kind: FindingKind::LowFollowRate,
                    domain: domain.clone(),
                    instruction: format!(
                        "Cleanup scan: skill `{}` keeps being retrieved but is \
                         almost never followed ({} of {} requests).\n\n{}\n\n\
                         Its description likely over-promises. Narrow the \
                         description and situation so it stops matching tasks \
                         it does not help with, or delete it if it serves no \
                         purpose.",
                        skill.id(),
                        skill.metrics.times_followed,
                        skill.metrics.times_requested,
                        skill.to_evaluation_markdown()
                    ),
                });
            }
        }
    }

    info!(findings = findings.len(), "cleanup scan finished");
    Ok(findings)
}

/// Totals from one cleanup run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub findings: usize,
    pub mutated: usize,
    pub no_action: usize,
    pub aborted: usize,
}

/// Scan, then hand each finding to the curator. Re-running on an
/// already-clean book finds nothing and changes nothing.
pub async fn run(
    book: &mut SkillBook,
    index: &SimilarityIndex,
    curator: &Curator,
    policy: &CleanupPolicy,
) -> Result<CleanupReport> {
    let findings = scan(book, index, policy)?;
    let mut report = CleanupReport {
        findings: findings.len(),
        ..Default::default()
    };

    for finding in findings {
        let kind = finding.kind;
        let item = finding.into_item();
        match curator.curate_item(book, index, &item).await? {
            CurationOutcome::Mutated { action, detail } => {
                info!(?kind, %action, %detail, "cleanup finding resolved");
                report.mutated += 1;
            }
            CurationOutcome::NoAction { reason } => {
                info!(?kind, %reason, "cleanup finding dismissed");
                report.no_action += 1;
            }
            CurationOutcome::Aborted => {
                report.aborted += 1;
            }
        }
    }
    Ok(report)
}
