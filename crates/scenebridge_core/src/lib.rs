//! # scenebridge core
//!
//! Bidirectional synchronization and transaction engine between the two
//! scenebridge hierarchies.
//!
//! This crate provides:
//! - [`SyncManager`]: the pull / merge / discard / duplicate façade with a
//!   reentrancy guard and an autonomous pull listener
//! - [`PathTranslator`]: the record pair mapping pulled prims to editable
//!   nodes and back
//! - [`TransactionRecorder`] and [`Transaction`]: one reversible unit per
//!   operation, handed to the host's [`UndoSink`]
//! - [`UpdaterRegistry`] and the [`Updater`] contract: per-node-type
//!   customization with a guaranteed fallback
//! - [`ScratchInfrastructure`]: the containers grouping materialized nodes
//! - The bulk job boundary with in-memory reference implementations
//!
//! ## Architecture
//!
//! A pull imports a persisted subtree into the editable hierarchy and then
//! customizes each created node through its type's updater; a merge
//! exports the edited subtree into a scratch layer and folds it back with
//! a pre-order copy traversal and a post-order finalization traversal.
//! Every mutation of either hierarchy is recorded into exactly one
//! transaction per operation. Change notices emitted by the persisted
//! hierarchy during an operation are suppressed by the reentrancy guard;
//! outside operations they can trigger autonomous pulls of qualifying
//! node types.
//!
//! ## Key invariants
//!
//! - A pull record and its back-reference are written and cleared as a
//!   pair; readers tolerate orphans and report "not pulled"
//! - The scratch root exists exactly while at least one pull parent does
//! - A pulled prim stays excluded from rendering for the lifetime of the
//!   edit session
//! - The engines never invoke undo themselves

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod crosspath;
mod error;
mod jobs;
mod manager;
mod notify;
mod pull;
mod push;
mod scratch;
mod transaction;
mod translator;
mod updater;

pub use crosspath::{CrossPath, CrossSegment, Hierarchy};
pub use error::{SyncError, SyncResult};
pub use jobs::{
    ExportJob, ExportJobProvider, ExportOutput, ImportJob, ImportJobProvider, ImportOutput,
    SubtreeExportProvider, SubtreeExporter, SubtreeImportProvider, SubtreeImporter, TypeMap,
    SOURCE_TYPE_ATTR,
};
pub use manager::{SyncManager, EDIT_SET_NAME};
pub use notify::{BridgeObserver, Notifier};
pub use pull::PullState;
pub use push::PushState;
pub use scratch::{ScratchInfrastructure, SCRATCH_ROOT_NAME};
pub use transaction::{
    MemoryUndoSink, MutingGuard, Transaction, TransactionItem, TransactionRecorder, UndoSink,
};
pub use translator::{PathTranslator, PULL_RECORD_KEY, SOURCE_PATH_ATTR};
pub use updater::{
    Capabilities, CopySpecs, FallbackUpdater, OperationArgs, RegistryEntry, Updater,
    UpdaterContext, UpdaterFactory, UpdaterRegistry,
};
