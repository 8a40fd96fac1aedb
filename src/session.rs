//! Skill Session
//!
//! The single entry point a consumer agent holds. Owns the book behind
//! one coarse RwLock: reads (retrieval, listing) take the read lock,
//! and the end-of-task pipeline (reflect, apply metrics, curate, save)
//! runs as the single writer. There is no global instance; everything
//! the pipeline needs is passed in at construction.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::cleanup::{self, CleanupPolicy, CleanupReport};
use crate::curator::{CurationItem, CurationOutcome, CurationPolicy, Curator};
use crate::embeddings::Embedder;
use crate::reflector::{apply_review_metrics, Reflector};
use crate::similarity::{SimilarityIndex, SkillMatch};
use crate::skillbook::{SkillBook, SkillSummary};
use crate::store::SkillStore;

/// What happened when a task was folded into the book.
#[derive(Debug, Default, Clone)]
pub struct TaskReport {
    pub reviews: usize,
    pub learnings: usize,
    pub mutated: usize,
    pub no_action: usize,
    pub aborted: usize,
    /// Items dropped because an external call kept failing.
    pub skipped: usize,
}

pub struct SkillSession {
    book: Arc<RwLock<SkillBook>>,
    store: SkillStore,
    index: SimilarityIndex,
    reflector: Reflector,
    curator: Curator,
    curation: CurationPolicy,
    cleanup: CleanupPolicy,
}

impl SkillSession {
    /// Load the book from disk and wire up the pipeline. Malformed store
    /// content is fatal here, never silently skipped.
    pub async fn open(
        store: SkillStore,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn crate::claude::ToolModel>,
        curation: CurationPolicy,
        cleanup: CleanupPolicy,
    ) -> Result<Self> {
        let book = store
            .load_or_init()
            .await
            .context("failed to load skill book")?;
        info!(
            domains = book.get_domain_ids().len(),
            skills = book.skill_count(),
            "skill book loaded"
        );

        Ok(Self {
            book: Arc::new(RwLock::new(book)),
            store,
            index: SimilarityIndex::new(embedder),
            reflector: Reflector::new(model.clone()),
            curator: Curator::new(model, curation.clone()),
            curation,
            cleanup,
        })
    }

    /// Domains available to a consumer.
    pub async fn domains(&self) -> Vec<SkillSummary> {
        let book = self.book.read().await;
        book.domains()
            .map(|d| SkillSummary {
                id: d.id.clone(),
                description: d.description.clone(),
            })
            .collect()
    }

    /// Id + description of every skill in a domain.
    pub async fn domain_skills(&self, domain: &str) -> Result<Vec<SkillSummary>> {
        let book = self.book.read().await;
        Ok(book.get_domain_skills(domain)?)
    }

    /// Retrieval for a running task: skills in `domain` relevant to
    /// `query`. The caller keeps the returned ids and passes them back
    /// to [`finish_task`](Self::finish_task).
    pub async fn fetch_skills(&self, domain: &str, query: &str) -> Result<Vec<SkillMatch>> {
        let book = self.book.read().await;
        self.index
            .find_similar(
                &book,
                domain,
                query,
                self.curation.retrieval_threshold,
                self.curation.retrieval_limit,
            )
            .await
    }

    /// Full content of up to 4 skills by id.
    pub async fn read_skills(&self, skill_ids: &[String]) -> Result<Vec<String>> {
        let book = self.book.read().await;
        Ok(book.read_skills(skill_ids)?)
    }

    pub async fn skill_count(&self) -> usize {
        self.book.read().await.skill_count()
    }

    /// Fold a finished trajectory into the book: reflect once, bump
    /// metrics, run the curator per item, refresh embeddings, persist.
    /// A single failing item is skipped and logged; the batch continues.
    pub async fn finish_task(
        &self,
        trajectory: &str,
        fetched_skill_ids: &[String],
    ) -> Result<TaskReport> {
        let mut book = self.book.write().await;

        let reflection = self
            .reflector
            .reflect(&book, trajectory, fetched_skill_ids)
            .await
            .context("trajectory reflection failed")?;

        let mut report = TaskReport {
            reviews: reflection.skill_reviews.len(),
            learnings: reflection.learnings.len(),
            ..Default::default()
        };

        for review in &reflection.skill_reviews {
            if let Err(e) = apply_review_metrics(&mut book, review) {
                // Reviews are validated against fetched ids, but a prior
                // item this run may have deleted or merged the skill.
                warn!(skill_id = review.skill_id(), error = %e, "metrics not applied");
            }
        }

        let items: Vec<CurationItem> = reflection
            .skill_reviews
            .iter()
            .cloned()
            .map(CurationItem::Review)
            .chain(
                reflection
                    .learnings
                    .iter()
                    .cloned()
                    .map(CurationItem::Learning),
            )
            .collect();

        for item in &items {
            match self.curator.curate_item(&mut book, &self.index, item).await {
                Ok(CurationOutcome::Mutated { action, detail }) => {
                    info!(%action, %detail, "curation applied");
                    report.mutated += 1;
                }
                Ok(CurationOutcome::NoAction { .. }) => report.no_action += 1,
                Ok(CurationOutcome::Aborted) => report.aborted += 1,
                Err(e) => {
                    error!(error = %e, "curation item skipped after repeated failures");
                    report.skipped += 1;
                }
            }
        }

        if let Err(e) = self.index.ensure_embeddings(&mut book, &self.store).await {
            // Retrieval degrades (stale skills are excluded) but the
            // content changes still land on disk.
            error!(error = %e, "embedding refresh failed, continuing with stale entries");
        }

        self.store
            .save(&book)
            .await
            .context("failed to persist skill book")?;

        info!(
            reviews = report.reviews,
            learnings = report.learnings,
            mutated = report.mutated,
            skipped = report.skipped,
            "task folded into skill book"
        );
        Ok(report)
    }

    /// Run the catalog health scan and persist whatever it changed.
    pub async fn run_cleanup(&self) -> Result<CleanupReport> {
        let mut book = self.book.write().await;

        self.index.ensure_embeddings(&mut book, &self.store).await?;
        let report = cleanup::run(&mut book, &self.index, &self.curator, &self.cleanup).await?;

        if report.mutated > 0 {
            self.index.ensure_embeddings(&mut book, &self.store).await?;
            self.store
                .save(&book)
                .await
                .context("failed to persist skill book")?;
        }
        Ok(report)
    }

    /// Refresh stale embeddings and persist the cache.
    pub async fn refresh_embeddings(&self) -> Result<usize> {
        let mut book = self.book.write().await;
        self.index.ensure_embeddings(&mut book, &self.store).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claude::ContentBlock;
    use crate::curator::test_support::ScriptedModel;
    use crate::embeddings::test_support::StubEmbedder;
    use tempfile::TempDir;

    fn reflection_turn(json: serde_json::Value) -> Vec<ContentBlock> {
        ScriptedModel::text_turn(&json.to_string())
    }

    async fn seeded_store(tmp: &TempDir) -> SkillStore {
        let store = SkillStore::new(tmp.path());
        let book = crate::skillbook::test_support::sample_book();
        store.save(&book).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_finish_task_applies_metrics_and_persists() {
        let tmp = TempDir::new().unwrap();
        let store = seeded_store(&tmp).await;

        // Turn 1: reflection JSON. Turn 2: curator annotates the skill.
        let model = ScriptedModel::new(vec![
            reflection_turn(serde_json::json!({
                "skill_reviews": [{
                    "outcome": "positive",
                    "skill_id": "gimp/color-to-alpha",
                    "followed": "yes",
                    "what_helped": "Went straight to the right filter"
                }],
                "learnings": []
            })),
            ScriptedModel::text_turn("Healthy skill, leaving it alone."),
        ]);

        let session = SkillSession::open(
            store,
            Arc::new(StubEmbedder::new(4)),
            Arc::new(model),
            CurationPolicy::default(),
            CleanupPolicy::default(),
        )
        .await
        .unwrap();

        let report = session
            .finish_task(
                "Task: remove the white background. Fetched the skill, followed it, success.",
                &["gimp/color-to-alpha".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(report.reviews, 1);
        assert_eq!(report.no_action, 1);
        assert_eq!(report.mutated, 0);

        // Reload from disk: the metrics bump survived.
        let reloaded = SkillStore::new(tmp.path()).load().await.unwrap();
        let m = &reloaded.get_skill("gimp/color-to-alpha").unwrap().metrics;
        assert_eq!(m.times_requested, 1);
        assert_eq!(m.times_followed, 1);
        assert_eq!(m.positive_impact, 1);
    }

    #[tokio::test]
    async fn test_finish_task_with_no_fetched_skills() {
        let tmp = TempDir::new().unwrap();
        let store = seeded_store(&tmp).await;

        let model = ScriptedModel::new(vec![reflection_turn(serde_json::json!({
            "skill_reviews": [],
            "learnings": []
        }))]);

        let session = SkillSession::open(
            store,
            Arc::new(StubEmbedder::new(4)),
            Arc::new(model),
            CurationPolicy::default(),
            CleanupPolicy::default(),
        )
        .await
        .unwrap();

        let report = session.finish_task("Trivial task, no skills needed.", &[]).await.unwrap();
        assert_eq!(report.reviews, 0);
        assert_eq!(report.learnings, 0);
    }

    #[tokio::test]
    async fn test_reads_concurrent_with_session() {
        let tmp = TempDir::new().unwrap();
        let store = seeded_store(&tmp).await;
        let model = ScriptedModel::new(vec![]);

        let session = SkillSession::open(
            store,
            Arc::new(StubEmbedder::new(4)),
            Arc::new(model),
            CurationPolicy::default(),
            CleanupPolicy::default(),
        )
        .await
        .unwrap();

        session.refresh_embeddings().await.unwrap();
        let domains = session.domains().await;
        assert_eq!(domains.len(), 1);
        let skills = session.domain_skills("gimp").await.unwrap();
        assert_eq!(skills.len(), 1);
        let rendered = session
            .read_skills(&["gimp/color-to-alpha".to_string()])
            .await
            .unwrap();
        assert!(rendered[0].contains("## Guidance"));
    }
}
