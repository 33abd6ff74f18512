//! MongoDB persistence
//!
//! Typed collection wrapper, document schemas and the store implementations
//! used when the service runs against a real database.

pub mod mongo;
pub mod schemas;
pub mod stores;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata, Schema};
pub use stores::{MongoNotificationStore, MongoPrincipalStore, MongoRequestStore};
