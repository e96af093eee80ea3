//! # scenebridge scene
//!
//! The editable hierarchy of scenebridge: a live, node-based authoring
//! scene graph.
//!
//! This crate provides:
//! - [`NodeId`]: opaque, stable node handles
//! - [`SceneGraph`]: named, typed, reparentable nodes with string
//!   attributes, lock and outliner-visibility flags, named membership
//!   sets, and a selection list
//! - [`NodeSnapshot`]: reversible node deletion for transaction items

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod graph;
mod id;

pub use error::{SceneError, SceneResult};
pub use graph::{NodeSnapshot, SceneGraph};
pub use id::NodeId;
