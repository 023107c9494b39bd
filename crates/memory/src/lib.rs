//! Conversational retrieval memory for Parley.
//!
//! This crate turns chat turns into retrievable context for a downstream
//! agent:
//!
//! - **Sessions**: a bounded window of recent turns per `(user, session)`,
//!   cached with a TTL and mirrored in process memory
//! - **Retrieval**: past turns and notes embedded and searched by similarity,
//!   always filtered by `user_id`
//! - **Resolution**: pronouns in a query substituted with recently
//!   mentioned entities
//! - **Analytics**: latency and relevance of every retrieval, with a health
//!   classification
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ContextEngine                        │
//! │   add_turn · get_context · search_notes · forget_user    │
//! ├──────────────┬──────────────────┬────────────────────────┤
//! │ SessionStore │EmbeddingGenerator│ VectorIndex            │
//! │  cache tier  │    lazy model    │ tenant filter          │
//! │  local tier  │ emb:{model}:{h}  │ hybrid re-ranking      │
//! ├──────────────┴────────┬─────────┴──────────┬─────────────┤
//! │      CacheStore       │   TextEncoder      │VectorBackend│
//! │  Redis | memory | off │ fastembed | hashing│Qdrant|memory│
//! └───────────────────────┴────────────────────┴─────────────┘
//!                 RetrievalAnalytics (metrics + health)
//! ```

pub mod analytics;
pub mod cache;
pub mod config;
pub mod context;
pub mod embedding;
pub mod entities;
pub mod index;
pub mod session;
pub mod types;

pub use analytics::{AggregatedMetrics, HealthReport, HealthStatus, QueryMetrics, QueryType, RetrievalAnalytics};
pub use cache::{CacheStats, CacheStore};
pub use config::{CacheBackendKind, MemoryConfig, VectorBackendKind};
pub use context::{format_for_prompt, ContextEngine, EngineComponents, EngineStats, ForgetReport};
pub use embedding::{EmbeddingGenerator, EmbeddingStats};
pub use entities::{extract_entities, resolve_references};
pub use index::{SearchQuery, VectorIndex};
pub use session::SessionStore;
pub use types::{ConversationContext, NewNote, NoteHit, SearchResult, TurnReceipt, VectorRecord};
