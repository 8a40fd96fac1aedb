//! Skill Book Persistence
//!
//! File-backed layout: one directory per domain, one markdown file per
//! skill (TOML metadata block + free-text guidance body), a TOML domain
//! index, and a JSON embedding cache keyed by skill id. Saves are full
//! rewrites; every file goes through a temp-and-rename so a crash never
//! leaves a half-written file behind. A malformed skill file is fatal on
//! load, since silently dropping skills would corrupt downstream metrics.

use crate::skillbook::{
    description_hash, Annotation, Skill, SkillBook, SkillDomain, SkillMetrics,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const INDEX_FILE: &str = "index.toml";
const EMBEDDING_CACHE_FILE: &str = "embeddings.json";
const METADATA_DELIMITER: &str = "+++";

/// Fatal persistence errors. The operator must fix or remove the
/// offending file; load never skips content.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed domain index {path}: {reason}")]
    MalformedIndex { path: PathBuf, reason: String },

    #[error("malformed skill file {path}: {reason}")]
    MalformedSkill { path: PathBuf, reason: String },

    #[error("malformed embedding cache {path}: {reason}")]
    MalformedCache { path: PathBuf, reason: String },
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Domain index file: domain id -> description.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DomainIndex {
    domains: BTreeMap<String, String>,
}

/// Metadata block at the top of each skill file. The guidance body lives
/// below the closing delimiter.
#[derive(Debug, Serialize, Deserialize)]
struct SkillMetadata {
    name: String,
    description: String,
    situation: String,
    #[serde(default)]
    annotations: Vec<Annotation>,
    #[serde(default)]
    metrics: SkillMetrics,
}

/// One entry in the embedding cache file.
#[derive(Debug, Serialize, Deserialize)]
struct CachedEmbedding {
    description_hash: String,
    embedding: Vec<f32>,
}

/// File-backed store for a whole [`SkillBook`].
pub struct SkillStore {
    root: PathBuf,
}

impl SkillStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the whole book, or start empty when the location has never
    /// been saved to.
    pub async fn load_or_init(&self) -> Result<SkillBook, StoreError> {
        if !self.root.join(INDEX_FILE).exists() {
            info!(root = %self.root.display(), "no skill book found, starting empty");
            return Ok(SkillBook::new());
        }
        self.load().await
    }

    /// Load the whole book. Every skill file must parse; cached
    /// embeddings are reattached only when their description hash still
    /// matches, otherwise the skill stays flagged for regeneration.
    pub async fn load(&self) -> Result<SkillBook, StoreError> {
        let index_path = self.root.join(INDEX_FILE);
        let raw = tokio::fs::read_to_string(&index_path)
            .await
            .map_err(|e| io_err(&index_path, e))?;
        let index: DomainIndex =
            toml::from_str(&raw).map_err(|e| StoreError::MalformedIndex {
                path: index_path.clone(),
                reason: e.to_string(),
            })?;

        let mut book = SkillBook::new();
        for (id, description) in &index.domains {
            book.insert_loaded_domain(SkillDomain {
                id: id.clone(),
                description: description.clone(),
            });
        }

        for domain_id in index.domains.keys() {
            let dir = self.root.join(domain_id);
            if !dir.exists() {
                continue; // a domain may exist before its first skill
            }
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| io_err(&dir, e))?;
            while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(&dir, e))? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                let skill = self.load_skill_file(&path, domain_id).await?;
                book.insert_loaded(skill)
                    .map_err(|e| StoreError::MalformedSkill {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
            }
        }

        self.reattach_embeddings(&mut book).await?;

        info!(
            root = %self.root.display(),
            domains = book.get_domain_ids().len(),
            skills = book.skill_count(),
            "skill book loaded"
        );
        Ok(book)
    }

    async fn load_skill_file(&self, path: &Path, domain: &str) -> Result<Skill, StoreError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| io_err(path, e))?;
        let (meta, body) = split_metadata(&raw).ok_or_else(|| StoreError::MalformedSkill {
            path: path.to_path_buf(),
            reason: format!("missing '{}' metadata delimiters", METADATA_DELIMITER),
        })?;
        let meta: SkillMetadata =
            toml::from_str(meta).map_err(|e| StoreError::MalformedSkill {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let expected = format!("{}.md", meta.name);
        let actual = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if actual != expected {
            return Err(StoreError::MalformedSkill {
                path: path.to_path_buf(),
                reason: format!("file name does not match skill name '{}'", meta.name),
            });
        }

        let guidance = body.trim();
        if guidance.is_empty() {
            return Err(StoreError::MalformedSkill {
                path: path.to_path_buf(),
                reason: "empty guidance body".to_string(),
            });
        }

        Ok(Skill {
            domain: domain.to_string(),
            name: meta.name,
            description: meta.description,
            situation: meta.situation,
            guidance: guidance.to_string(),
            annotations: meta.annotations,
            metrics: meta.metrics,
            embedding: None,
            description_hash: None,
        })
    }

    async fn reattach_embeddings(&self, book: &mut SkillBook) -> Result<(), StoreError> {
        let cache_path = self.root.join(EMBEDDING_CACHE_FILE);
        if !cache_path.exists() {
            return Ok(());
        }
        let raw = tokio::fs::read_to_string(&cache_path)
            .await
            .map_err(|e| io_err(&cache_path, e))?;
        let cache: BTreeMap<String, CachedEmbedding> =
            serde_json::from_str(&raw).map_err(|e| StoreError::MalformedCache {
                path: cache_path.clone(),
                reason: e.to_string(),
            })?;

        let mut reattached = 0usize;
        let mut stale = 0usize;
        for skill in book.all_skills_mut() {
            match cache.get(&skill.id()) {
                Some(entry) if entry.description_hash == description_hash(&skill.description) => {
                    skill.embedding = Some(entry.embedding.clone());
                    skill.description_hash = Some(entry.description_hash.clone());
                    reattached += 1;
                }
                Some(_) => stale += 1,
                None => {}
            }
        }
        debug!(reattached, stale, "embedding cache applied");
        Ok(())
    }

    /// Persist the whole book: every skill file, the domain index, and
    /// the embedding cache. Full rewrite; files for deleted skills or
    /// domains are removed.
    pub async fn save(&self, book: &SkillBook) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_err(&self.root, e))?;

        let mut index = DomainIndex::default();
        for domain in book.domains() {
            index.domains
                .insert(domain.id.clone(), domain.description.clone());
        }
        let index_toml =
            toml::to_string_pretty(&index).map_err(|e| StoreError::MalformedIndex {
                path: self.root.join(INDEX_FILE),
                reason: e.to_string(),
            })?;
        write_atomic(&self.root.join(INDEX_FILE), index_toml.as_bytes()).await?;

        for domain in book.domains() {
            let dir = self.root.join(&domain.id);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| io_err(&dir, e))?;
            for skill in book.skills_in_domain(&domain.id) {
                let rendered = render_skill_file(skill)?;
                write_atomic(&dir.join(format!("{}.md", skill.name)), rendered.as_bytes())
                    .await?;
            }
        }

        self.remove_orphans(book).await?;
        self.save_embedding_cache(book).await?;

        debug!(root = %self.root.display(), skills = book.skill_count(), "skill book saved");
        Ok(())
    }

    /// Persist only the embedding cache, used right after a batch of
    /// recomputed embeddings so the expensive work survives a crash.
    pub async fn save_embedding_cache(&self, book: &SkillBook) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_err(&self.root, e))?;
        let mut cache: BTreeMap<String, CachedEmbedding> = BTreeMap::new();
        for skill in book.all_skills() {
            if let (Some(embedding), Some(hash)) = (&skill.embedding, &skill.description_hash) {
                cache.insert(
                    skill.id(),
                    CachedEmbedding {
                        description_hash: hash.clone(),
                        embedding: embedding.clone(),
                    },
                );
            }
        }
        let path = self.root.join(EMBEDDING_CACHE_FILE);
        let json = serde_json::to_vec(&cache).map_err(|e| StoreError::MalformedCache {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&path, &json).await
    }

    /// Delete skill files and domain directories no longer in the book.
    async fn remove_orphans(&self, book: &SkillBook) -> Result<(), StoreError> {
        let live_domains = book.get_domain_ids();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| io_err(&self.root, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(&self.root, e))? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let domain = match path.file_name().and_then(|n| n.to_str()) {
                Some(d) => d.to_string(),
                None => continue,
            };
            if !live_domains.contains(&domain) {
                tokio::fs::remove_dir_all(&path)
                    .await
                    .map_err(|e| io_err(&path, e))?;
                continue;
            }
            let live_files: Vec<String> = book
                .skills_in_domain(&domain)
                .map(|s| format!("{}.md", s.name))
                .collect();
            let mut files = tokio::fs::read_dir(&path)
                .await
                .map_err(|e| io_err(&path, e))?;
            while let Some(file) = files.next_entry().await.map_err(|e| io_err(&path, e))? {
                let fpath = file.path();
                let fname = match fpath.file_name().and_then(|n| n.to_str()) {
                    Some(f) => f.to_string(),
                    None => continue,
                };
                if fname.ends_with(".md") && !live_files.contains(&fname) {
                    tokio::fs::remove_file(&fpath)
                        .await
                        .map_err(|e| io_err(&fpath, e))?;
                }
            }
        }
        Ok(())
    }
}

/// Render one skill file: TOML metadata block between delimiters, then
/// the guidance body.
fn render_skill_file(skill: &Skill) -> Result<String, StoreError> {
    let meta = SkillMetadata {
        name: skill.name.clone(),
        description: skill.description.clone(),
        situation: skill.situation.clone(),
        annotations: skill.annotations.clone(),
        metrics: skill.metrics.clone(),
    };
    let meta_toml = toml::to_string_pretty(&meta).map_err(|e| StoreError::MalformedSkill {
        path: PathBuf::from(format!("{}.md", skill.name)),
        reason: e.to_string(),
    })?;
    Ok(format!(
        "{}\n{}{}\n\n{}\n",
        METADATA_DELIMITER, meta_toml, METADATA_DELIMITER, skill.guidance
    ))
}

/// Split a skill file into (metadata TOML, body). Returns None when the
/// delimiters are missing.
fn split_metadata(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix(METADATA_DELIMITER)?;
    let end = rest.find(METADATA_DELIMITER)?;
    Some((&rest[..end], &rest[end + METADATA_DELIMITER.len()..]))
}

/// Write a file through a temp sibling and atomic rename.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| io_err(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_err(path, e))?;
    Ok(())
}
