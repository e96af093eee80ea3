//! Reversible operation recording.
//!
//! Every top-level engine operation records its mutations into exactly one
//! [`Transaction`], a heterogeneous list of reversible items. The finished
//! transaction is handed to the host's [`UndoSink`]; the engine never
//! invokes undo on its own behalf.

use parking_lot::Mutex;
use scenebridge_scene::{NodeId, NodeSnapshot, SceneGraph};
use std::fmt;
use std::sync::Arc;

/// A reversible unit of work inside a transaction.
///
/// Items are either do/undo closure pairs or structural records that know
/// how to reverse themselves against the scene graph.
pub enum TransactionItem {
    /// A pure do/undo closure pair.
    Closure {
        /// Diagnostic label.
        name: String,
        /// Re-applies the operation.
        redo: Box<dyn FnMut() -> bool + Send>,
        /// Reverses the operation.
        undo: Box<dyn FnMut() -> bool + Send>,
    },
    /// A node was created; the snapshot recreates it on redo.
    NodeCreated {
        /// The owning scene graph.
        scene: Arc<SceneGraph>,
        /// Snapshot taken right after creation.
        snapshot: NodeSnapshot,
    },
    /// A node was deleted; the snapshot restores it on undo.
    NodeDeleted {
        /// The owning scene graph.
        scene: Arc<SceneGraph>,
        /// Snapshot taken right before deletion.
        snapshot: NodeSnapshot,
    },
    /// The selection was replaced.
    SelectionChanged {
        /// The owning scene graph.
        scene: Arc<SceneGraph>,
        /// Selection before the change.
        before: Vec<NodeId>,
        /// Selection after the change.
        after: Vec<NodeId>,
    },
    /// A subtree's lock state was changed.
    LockChanged {
        /// The owning scene graph.
        scene: Arc<SceneGraph>,
        /// Root of the affected subtree.
        root: NodeId,
        /// The lock state that was applied.
        locked: bool,
    },
}

impl TransactionItem {
    fn undo(&mut self) -> bool {
        match self {
            TransactionItem::Closure { undo, .. } => undo(),
            TransactionItem::NodeCreated { scene, snapshot } => {
                scene.delete_node(snapshot.id).is_ok()
            }
            TransactionItem::NodeDeleted { scene, snapshot } => scene.restore(snapshot).is_ok(),
            TransactionItem::SelectionChanged { scene, before, .. } => {
                scene.select(before.clone());
                true
            }
            TransactionItem::LockChanged { scene, root, locked } => {
                scene.lock_subtree(*root, !*locked).is_ok()
            }
        }
    }

    fn redo(&mut self) -> bool {
        match self {
            TransactionItem::Closure { redo, .. } => redo(),
            TransactionItem::NodeCreated { scene, snapshot } => scene.restore(snapshot).is_ok(),
            TransactionItem::NodeDeleted { scene, snapshot } => {
                scene.delete_node(snapshot.id).is_ok()
            }
            TransactionItem::SelectionChanged { scene, after, .. } => {
                scene.select(after.clone());
                true
            }
            TransactionItem::LockChanged { scene, root, locked } => {
                scene.lock_subtree(*root, *locked).is_ok()
            }
        }
    }
}

impl fmt::Debug for TransactionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionItem::Closure { name, .. } => write!(f, "Closure({name})"),
            TransactionItem::NodeCreated { snapshot, .. } => {
                write!(f, "NodeCreated({})", snapshot.id)
            }
            TransactionItem::NodeDeleted { snapshot, .. } => {
                write!(f, "NodeDeleted({})", snapshot.id)
            }
            TransactionItem::SelectionChanged { after, .. } => {
                write!(f, "SelectionChanged({} selected)", after.len())
            }
            TransactionItem::LockChanged { root, locked, .. } => {
                write!(f, "LockChanged({root}, {locked})")
            }
        }
    }
}

/// One undoable unit: the ordered list of items recorded by a single
/// top-level operation.
#[derive(Debug)]
pub struct Transaction {
    name: String,
    items: Vec<TransactionItem>,
}

impl Transaction {
    /// Creates an empty transaction.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    /// Returns the transaction's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the number of recorded items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Appends an item.
    pub fn push(&mut self, item: TransactionItem) {
        self.items.push(item);
    }

    /// Undoes every item, most recent first. Failures do not stop the
    /// remaining items; the return value reports whether all succeeded.
    pub fn undo(&mut self) -> bool {
        let mut ok = true;
        for item in self.items.iter_mut().rev() {
            ok &= item.undo();
        }
        ok
    }

    /// Redoes every item in recorded order.
    pub fn redo(&mut self) -> bool {
        let mut ok = true;
        for item in &mut self.items {
            ok &= item.redo();
        }
        ok
    }
}

/// Receives completed transactions. The host owns undo/redo; the engine
/// only hands transactions over.
pub trait UndoSink: Send + Sync {
    /// Accepts one completed transaction.
    fn commit(&self, transaction: Transaction);
}

/// An in-memory undo sink for hosts and tests.
#[derive(Default)]
pub struct MemoryUndoSink {
    transactions: Mutex<Vec<Transaction>>,
}

impl MemoryUndoSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of committed transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.lock().len()
    }

    /// Returns true if nothing was committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.lock().is_empty()
    }

    /// Removes and returns the most recent transaction.
    #[must_use]
    pub fn pop(&self) -> Option<Transaction> {
        self.transactions.lock().pop()
    }

    /// Removes and returns all committed transactions.
    #[must_use]
    pub fn take_all(&self) -> Vec<Transaction> {
        std::mem::take(&mut *self.transactions.lock())
    }
}

impl UndoSink for MemoryUndoSink {
    fn commit(&self, transaction: Transaction) {
        self.transactions.lock().push(transaction);
    }
}

#[derive(Default)]
struct RecorderInner {
    current: Option<Transaction>,
    muted: usize,
}

/// Records transaction items for the operation currently in flight.
///
/// A recorder holds at most one open transaction. The first `open` in a
/// call chain owns the scope; nested opens append to it. While muted,
/// closure effects still execute but nothing is recorded; the autonomous
/// pull listener runs muted because its work happens outside any
/// host-visible operation.
#[derive(Default)]
pub struct TransactionRecorder {
    inner: Mutex<RecorderInner>,
}

impl TransactionRecorder {
    /// Creates an idle recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a transaction scope if none is open. Returns true when this
    /// call created the scope (and its caller must eventually `take`).
    pub fn open(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.current.is_none() {
            inner.current = Some(Transaction::new(name));
            true
        } else {
            false
        }
    }

    /// Closes the scope and returns the recorded transaction.
    #[must_use]
    pub fn take(&self) -> Option<Transaction> {
        self.inner.lock().current.take()
    }

    /// Appends an item to the open scope. Dropped while muted; recorded
    /// into a fresh unscoped transaction if no scope is open.
    pub fn push(&self, item: TransactionItem) {
        let mut inner = self.inner.lock();
        if inner.muted > 0 {
            return;
        }
        inner
            .current
            .get_or_insert_with(|| Transaction::new("unscoped"))
            .push(item);
    }

    /// Executes `redo` immediately and records the closure pair. Returns
    /// what `redo` returned.
    pub fn execute(
        &self,
        name: &str,
        mut redo: impl FnMut() -> bool + Send + 'static,
        undo: impl FnMut() -> bool + Send + 'static,
    ) -> bool {
        let ok = redo();
        self.push(TransactionItem::Closure {
            name: name.to_string(),
            redo: Box::new(redo),
            undo: Box::new(undo),
        });
        ok
    }

    /// Records a closure pair without executing it (for work that already
    /// ran, like a bulk import job).
    pub fn record(
        &self,
        name: &str,
        redo: impl FnMut() -> bool + Send + 'static,
        undo: impl FnMut() -> bool + Send + 'static,
    ) {
        self.push(TransactionItem::Closure {
            name: name.to_string(),
            redo: Box::new(redo),
            undo: Box::new(undo),
        });
    }

    /// Mutes recording until the returned guard drops. Nests.
    #[must_use]
    pub fn mute(&self) -> MutingGuard<'_> {
        self.inner.lock().muted += 1;
        MutingGuard { recorder: self }
    }

    /// Returns true while recording is muted.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.inner.lock().muted > 0
    }
}

/// Guard returned by [`TransactionRecorder::mute`]; restores the previous
/// muting depth when dropped.
pub struct MutingGuard<'a> {
    recorder: &'a TransactionRecorder,
}

impl Drop for MutingGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.recorder.inner.lock();
        inner.muted = inner.muted.saturating_sub(1);
    }
}
