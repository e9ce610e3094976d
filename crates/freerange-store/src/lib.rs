//! Document store gateway.
//!
//! Durable, typed storage over an indexed JSON document engine. Entities are
//! persisted as whole JSON documents with the exact-match fields the query
//! paths need promoted into indexed keyword columns; opaque payload fields
//! (`content.data`, `metadata`, `static_headers`) ride along inside the
//! document and are never indexed.
//!
//! Two backends implement the repository traits: PostgreSQL (JSONB documents
//! through diesel/r2d2) for production, and an in-memory store with the same
//! semantics for tests and single-process development. All writes are
//! durable before acknowledgement and reads observe prior writes from the
//! same process.

pub mod error;
pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod query;
pub mod repository;
mod schema;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::{init_pool, PgPool, PostgresStore};
pub use query::{DocQuery, Filter, Sort, SortOrder};
pub use repository::{
    ApplicationRepository, NotificationRepository, Repositories, TemplateRepository,
    UserRepository,
};
