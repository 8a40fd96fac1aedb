//! Skillbook - a curated procedural memory for computer-use agents
//!
//! Agents fetch skills by domain and semantic similarity while working,
//! then hand the finished trajectory back. A reflection pass turns the
//! trajectory into typed reviews and candidate learnings, and a
//! tool-driven curator folds those into the store: creating, updating,
//! merging, annotating, or deleting skills. A periodic cleanup pass
//! keeps the catalog free of duplicates and dead weight.
//!
//! Skills live on disk as markdown files with TOML metadata, grouped by
//! domain, with a sidecar embedding cache keyed by description hash.

pub mod claude;
pub mod cleanup;
pub mod config;
pub mod curator;
pub mod embeddings;
pub mod reflector;
pub mod retry;
pub mod session;
pub mod similarity;
pub mod skillbook;
pub mod store;
pub mod tools;

pub use cleanup::{CleanupPolicy, CleanupReport};
pub use config::Config;
pub use curator::{CurationOutcome, CurationPolicy, Curator};
pub use embeddings::{cosine_similarity, Embedder, OllamaEmbedder};
pub use reflector::{Learning, Reflector, SkillReview, TrajectoryReflection};
pub use session::{SkillSession, TaskReport};
pub use similarity::{SimilarityIndex, SkillMatch};
pub use skillbook::{Skill, SkillBook, SkillDomain, SkillError, SkillMetrics, SkillUpdate};
pub use store::{SkillStore, StoreError};
