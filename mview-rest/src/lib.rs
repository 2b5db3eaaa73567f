//! mview REST Service
//!
//! Generates REST semantics over declared entity collections:
//! - Query translation (ids, field filters, field selection, depth, aggregates, paging)
//! - Depth-bounded, cycle-safe graph serialization with hyperlinks
//! - Pagination and response envelopes
//! - Create / update / delete payloads with relation deltas
//! - Method and permission-level interceptors

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregate;
pub mod auth;
pub mod envelope;
pub mod handlers;
pub mod pagination;
pub mod query;
pub mod schema;
pub mod serializer;
pub mod server;
pub mod service;
pub mod store;
pub mod write;

pub use auth::{BearerClaimsResolver, Interceptor, InterceptorChain, PrincipalResolver};
pub use handlers::RestState;
pub use query::QuerySpec;
pub use schema::{EntitySchema, SchemaRegistry};
pub use server::RestServer;
pub use service::{ModelView, ViewSettings};
pub use store::{EntityStore, InMemoryStore, Record};
