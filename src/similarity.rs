//! Similarity Index
//!
//! Semantic retrieval over skill descriptions, scoped to one domain.
//! Embeddings are cached per description hash; `ensure_embeddings`
//! recomputes only what changed and persists the cache immediately so
//! the batch work survives a crash. Pair scanning for the cleanup pass
//! is a plain O(n²) loop; catalogs hold tens of skills per domain.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::embeddings::{cosine_similarity, Embedder};
use crate::skillbook::SkillBook;
use crate::store::SkillStore;

/// One retrieval hit, rendered with full content so the caller need not
/// issue a second read.
#[derive(Debug, Clone)]
pub struct SkillMatch {
    pub skill_id: String,
    pub similarity: f32,
    pub content: String,
}

/// A near-duplicate pair found by the cleanup scan.
#[derive(Debug, Clone)]
pub struct SimilarPair {
    pub first: String,
    pub second: String,
    pub similarity: f32,
}

pub struct SimilarityIndex {
    embedder: Arc<dyn Embedder>,
}

impl SimilarityIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Recompute the embedding for every skill whose cached hash is
    /// stale or absent, then persist the cache. Returns how many were
    /// recomputed.
    pub async fn ensure_embeddings(
        &self,
        book: &mut SkillBook,
        store: &SkillStore,
    ) -> Result<usize> {
        let stale_ids: Vec<String> = book
            .all_skills()
            .filter(|s| s.embedding_is_stale())
            .map(|s| s.id())
            .collect();
        if stale_ids.is_empty() {
            debug!("all skill embeddings are fresh");
            return Ok(0);
        }

        let descriptions: Vec<String> = stale_ids
            .iter()
            .map(|id| book.get_skill(id).map(|s| s.description.clone()))
            .collect::<Result<_, _>>()?;

        let vectors = self.embedder.embed_batch(&descriptions).await?;
        for (id, vector) in stale_ids.iter().zip(vectors) {
            book.get_skill_mut(id)?.attach_embedding(vector);
        }

        store.save_embedding_cache(book).await?;
        info!(recomputed = stale_ids.len(), "stale skill embeddings refreshed");
        Ok(stale_ids.len())
    }

    /// Skills in `domain` whose description is semantically close to
    /// `query`: cosine >= `threshold`, top `max_results` descending.
    pub async fn find_similar(
        &self,
        book: &SkillBook,
        domain: &str,
        query: &str,
        threshold: f32,
        max_results: usize,
    ) -> Result<Vec<SkillMatch>> {
        book.get_domain(domain)?;
        let query_embedding = self.embedder.embed(query).await?;

        let mut matches: Vec<SkillMatch> = book
            .skills_in_domain(domain)
            .filter_map(|skill| {
                let embedding = match &skill.embedding {
                    Some(e) if !skill.embedding_is_stale() => e,
                    _ => {
                        warn!(skill_id = %skill.id(), "skipping skill with stale embedding");
                        return None;
                    }
                };
                let similarity = cosine_similarity(&query_embedding, embedding);
                (similarity >= threshold).then(|| SkillMatch {
                    skill_id: skill.id(),
                    similarity,
                    content: skill.to_markdown(),
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(max_results);
        Ok(matches)
    }

    /// All in-domain skill pairs with similarity >= `threshold`. Used
    /// only by the cleanup pass, never the retrieval hot path.
    pub fn find_similar_pairs(
        &self,
        book: &SkillBook,
        domain: &str,
        threshold: f32,
    ) -> Result<Vec<SimilarPair>> {
        book.get_domain(domain)?;
        let skills: Vec<_> = book
            .skills_in_domain(domain)
            .filter(|s| !s.embedding_is_stale())
            .collect();

        let mut pairs = Vec::new();
        for i in 0..skills.len() {
            for j in (i + 1)..skills.len() {
                let (a, b) = (skills[i], skills[j]);
                let similarity = match (&a.embedding, &b.embedding) {
                    (Some(ea), Some(eb)) => cosine_similarity(ea, eb),
                    _ => continue,
                };
                if similarity >= threshold {
                    pairs.push(SimilarPair {
                        first: a.id(),
                        second: b.id(),
                        similarity,
                    });
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::test_support::StubEmbedder;
    use crate::skillbook::test_support::sample_book;
    use tempfile::TempDir;

    fn index_with(stub: StubEmbedder) -> SimilarityIndex {
        SimilarityIndex::new(Arc::new(stub))
    }

    #[tokio::test]
    async fn test_ensure_embeddings_recomputes_only_stale() {
        let tmp = TempDir::new().unwrap();
        let store = SkillStore::new(tmp.path());
        let mut book = sample_book();
        book.create_skill(
            "gimp",
            "scale-image",
            "Resizing the whole image through Image > Scale Image",
            "Changing the pixel dimensions of an image in GIMP",
            "Open Image > Scale Image, set width/height, confirm with Scale.",
        )
        .unwrap();

        let index = index_with(StubEmbedder::new(8));
        let recomputed = index.ensure_embeddings(&mut book, &store).await.unwrap();
        assert_eq!(recomputed, 2);

        // Second pass: nothing stale.
        let recomputed = index.ensure_embeddings(&mut book, &store).await.unwrap();
        assert_eq!(recomputed, 0);

        // Edit one description: exactly one recompute.
        book.get_skill_mut("gimp/scale-image").unwrap().description =
            "Scaling image canvas and print resolution".to_string();
        let recomputed = index.ensure_embeddings(&mut book, &store).await.unwrap();
        assert_eq!(recomputed, 1);
    }

    #[tokio::test]
    async fn test_find_similar_threshold_and_ranking() {
        let tmp = TempDir::new().unwrap();
        let store = SkillStore::new(tmp.path());
        let mut book = sample_book();
        book.create_skill(
            "gimp",
            "export-png",
            "Exporting an image as PNG via File > Export As",
            "Saving work in a web-friendly raster format",
            "File > Export As, type a .png file name, confirm the export dialog.",
        )
        .unwrap();

        let stub = StubEmbedder::new(4);
        stub.assign(
            "Making a color transparent using the Color to Alpha filter",
            vec![1.0, 0.0, 0.0, 0.0],
        );
        stub.assign(
            "Exporting an image as PNG via File > Export As",
            vec![0.0, 1.0, 0.0, 0.0],
        );
        stub.assign("transparency query", vec![0.9, 0.1, 0.0, 0.0]);

        let index = index_with(stub);
        index.ensure_embeddings(&mut book, &store).await.unwrap();

        let matches = index
            .find_similar(&book, "gimp", "transparency query", 0.4, 3)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].skill_id, "gimp/color-to-alpha");
        assert!(matches[0].content.contains("## Guidance"));
    }

    #[tokio::test]
    async fn test_find_similar_monotone_in_threshold() {
        let tmp = TempDir::new().unwrap();
        let store = SkillStore::new(tmp.path());
        let mut book = sample_book();
        book.create_skill(
            "gimp",
            "export-png",
            "Exporting an image as PNG via File > Export As",
            "Saving work in a web-friendly raster format",
            "File > Export As, type a .png file name, confirm the export dialog.",
        )
        .unwrap();

        let stub = StubEmbedder::new(4);
        stub.assign(
            "Making a color transparent using the Color to Alpha filter",
            vec![0.8, 0.2, 0.0, 0.0],
        );
        stub.assign(
            "Exporting an image as PNG via File > Export As",
            vec![0.5, 0.5, 0.0, 0.0],
        );
        stub.assign("the query", vec![1.0, 0.0, 0.0, 0.0]);

        let index = index_with(stub);
        index.ensure_embeddings(&mut book, &store).await.unwrap();

        let mut last = usize::MAX;
        for threshold in [0.0, 0.3, 0.6, 0.9, 0.99] {
            let n = index
                .find_similar(&book, "gimp", "the query", threshold, 10)
                .await
                .unwrap()
                .len();
            assert!(n <= last, "raising threshold must not grow results");
            last = n;
        }
    }

    #[tokio::test]
    async fn test_high_threshold_returns_empty_not_error() {
        let tmp = TempDir::new().unwrap();
        let store = SkillStore::new(tmp.path());
        let mut book = sample_book();
        book.create_domain("chrome", "Google Chrome browser workflows")
            .unwrap();

        let index = index_with(StubEmbedder::new(8));
        index.ensure_embeddings(&mut book, &store).await.unwrap();

        let matches = index
            .find_similar(&book, "chrome", "irrelevant query", 0.99, 3)
            .await
            .unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_find_similar_pairs() {
        let tmp = TempDir::new().unwrap();
        let store = SkillStore::new(tmp.path());
        let mut book = sample_book();
        book.create_skill(
            "gimp",
            "alpha-channel",
            "Adding an alpha channel so a layer supports transparency",
            "A layer refuses transparency edits in GIMP",
            "Right-click the layer and choose Add Alpha Channel before transparency work.",
        )
        .unwrap();
        book.create_skill(
            "gimp",
            "export-png",
            "Exporting an image as PNG via File > Export As",
            "Saving work in a web-friendly raster format",
            "File > Export As, type a .png file name, confirm the export dialog.",
        )
        .unwrap();

        let stub = StubEmbedder::new(4);
        stub.assign(
            "Making a color transparent using the Color to Alpha filter",
            vec![1.0, 0.05, 0.0, 0.0],
        );
        stub.assign(
            "Adding an alpha channel so a layer supports transparency",
            vec![0.95, 0.1, 0.0, 0.0],
        );
        stub.assign(
            "Exporting an image as PNG via File > Export As",
            vec![0.0, 0.0, 1.0, 0.0],
        );

        let index = index_with(stub);
        index.ensure_embeddings(&mut book, &store).await.unwrap();

        let pairs = index.find_similar_pairs(&book, "gimp", 0.85).unwrap();
        assert_eq!(pairs.len(), 1);
        let pair = &pairs[0];
        assert!(pair.first.contains("alpha") && pair.second.contains("alpha"));
        assert!(pair.similarity >= 0.85);
    }
}
