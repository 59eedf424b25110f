//! enrober-state — the resource store Enrober reconciles against.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for the object kinds an environment is made of: namespaces,
//! routing secrets, deployments and the replica sets and pods they own.
//!
//! # Architecture
//!
//! All objects are JSON-serialized into redb's `&[u8]` value columns.
//! Namespaced objects use `{namespace}/{name}` keys so a namespace's
//! contents can be found (and cascaded away) by prefix scan. Lists filter
//! by equality label selectors.
//!
//! The reconciliation core talks to the [`ResourceStore`] trait; the
//! [`StateStore`] implementation is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{ResourceStore, StateStore};
pub use types::*;
