//! # scenebridge stage
//!
//! The persisted hierarchy of scenebridge: a layered, path-addressed
//! document tree.
//!
//! This crate provides:
//! - [`StagePath`]: absolute prim/property addresses with parent/child and
//!   relative-path derivation
//! - [`Layer`]: a single spec tree with tri-state traversal and copy
//!   utilities
//! - [`Stage`]: a root layer composed with a session overlay, with
//!   synchronous change notices
//! - [`Value`]: the field value type
//!
//! The session layer exists so that scratch bookkeeping (pull records,
//! active-state overrides) never mutates authored content.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod layer;
mod path;
mod stage;
mod value;

pub use error::{StageError, StageResult};
pub use layer::{Layer, PrimSpec, TraversalFailure, VisitOutcome};
pub use path::StagePath;
pub use stage::{ChangeNotice, Stage, StageObserver};
pub use value::Value;
