//! # Relata - Dual-Backend Entity/Repository Layer
//!
//! Relata is a data-access layer with one property model and two
//! storage backends: relational databases driven through SQL and
//! document stores driven through query documents.
//!
//! ## Key Features
//!
//! - **Declarative metadata**: Entities are described by an
//!   [model::EntityModel] built once, with per-property type, readonly,
//!   required, collection, uniqueness and relation declarations
//! - **Dirty tracking**: Records carry a snapshot of the values last
//!   seen in storage, and saving writes only what changed
//! - **Relations**: One-to-one, one-to-many and many-to-many relations
//!   with two resolution strategies, per-relation queries or a single
//!   joined query with exact paging
//! - **Lifecycle hooks**: `pre_save`/`post_save`,
//!   `pre_remove`/`post_remove` and `post_load` callbacks, with a quiet
//!   veto path for the `pre_*` hooks
//! - **Named connections**: Lazily opened, cached connection handles
//!   for both backends
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use relata::doc;
//! use relata::model::{EntityModel, ModelRegistry, PropertyMeta, PropertyType};
//! use relata::relational::{Condition, Conditions, QueryOptions, SqlRepository};
//!
//! # fn main() -> Result<(), relata::errors::RelataError> {
//! let registry = ModelRegistry::new();
//! let posts = registry.register(
//!     EntityModel::builder("post")
//!         .table("posts")
//!         .property(PropertyMeta::new("title", PropertyType::Str).required())
//!         .build()?,
//! );
//!
//! let repository = SqlRepository::new(posts, registry, driver);
//! let mut post = repository.create(&doc! { "title" => "hello" }, true)?;
//! repository.save(&mut post)?;
//!
//! for record in repository
//!     .load(
//!         &Conditions::from(Condition::eq("title", "hello")),
//!         &QueryOptions::default(),
//!     )?
//!     .values()
//! {
//!     println!("{}", record);
//! }
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod document;
pub mod errors;
pub mod model;
pub mod relational;
