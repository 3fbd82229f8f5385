//! # Tree Walker
//!
//! A [`Walker`] holds information for operating on trees: finding nodes and
//! doing work on them. Clients usually create a walker for a (sub-)tree to
//! search for a selection of nodes matching certain criteria, and then
//! perform some operation on this selection.
//!
//! A walker eventually produces two client-level values: a selection of tree
//! nodes and the last error occurred. Both are accessed through a
//! [`Promise`], the future-style synchronization point of a walk.
//!
//! A typical usage looks like this:
//!
//! ```ignore
//! let future = Walker::new(Some(root))
//!     .descendents_with(|test, _| Ok((test.payload() > &5).then(|| test.clone())))
//!     .promise();
//! let (nodes, err) = future.wait();
//! ```
//!
//! Walkers support a small set of search and filter builders which clients
//! chain to form tasks, similar in concept to a query DSL. Every builder
//! appends exactly one concurrent filter stage to the underlying pipeline;
//! the first one also seeds the pipeline with the walker's initial node.
//!
//! ATTENTION: clients must call [`Walker::promise`] as the final link of the
//! chain, even if they do not expect a non-empty selection. Firstly they
//! need to check for errors, and secondly a walker whose promise is never
//! obtained keeps its worker threads alive.
//!
//! ## Nil Walkers
//!
//! `Walker::new(None)` produces a nil walker: every builder is a no-op and
//! the promise yields an empty selection together with an
//! [`empty-tree`](WalkError::EmptyTree) error, without spawning a single
//! worker.

use std::sync::Arc;
use std::thread::JoinHandle;

use eyre::{eyre, Report};
use tracing::debug;

use super::node::NodeRef;
use super::pipeline::{Local, Package, Pipeline, Task, TaskContext};
use super::rank::RankMap;
use crate::error::WalkError;

/// A matcher against nodes of a tree, used by the selection builders.
///
/// `test` is the node under test; `origin` is the node the test was issued
/// for, where the filter distinguishes the two. A match returns the matched
/// node (usually `test` itself), a miss returns `None`.
pub type Predicate<T> =
    Arc<dyn Fn(&NodeRef<T>, Option<&NodeRef<T>>) -> eyre::Result<Option<NodeRef<T>>> + Send + Sync>;

/// An operation on tree nodes, used by the traversal builders. Receives the
/// node, its parent (if any) and its position below the parent; the
/// resulting node, if any, is handed to the next pipeline stage.
pub type Action<T> = Arc<
    dyn Fn(&NodeRef<T>, Option<&NodeRef<T>>, usize) -> eyre::Result<Option<NodeRef<T>>>
        + Send
        + Sync,
>;

/// A predicate matching anything. Useful to match the first node in a given
/// direction.
pub fn whatever<T>(
) -> impl Fn(&NodeRef<T>, Option<&NodeRef<T>>) -> eyre::Result<Option<NodeRef<T>>> + Send + Sync + Copy
{
    |test, _origin| Ok(Some(test.clone()))
}

/// A predicate matching the leafs of a tree.
pub fn node_is_leaf<T>(
) -> impl Fn(&NodeRef<T>, Option<&NodeRef<T>>) -> eyre::Result<Option<NodeRef<T>>> + Send + Sync + Copy
{
    |test, _origin| Ok((test.child_count() == 0).then(|| test.clone()))
}

/// An action for bottom-up processing: calculates the rank of each node as
/// one plus the ranks of its children. After a full bottom-up pass the root
/// holds the number of nodes in the tree and leafs have rank 1.
pub fn calc_rank<T>(
    n: &NodeRef<T>,
    _parent: Option<&NodeRef<T>>,
    _position: usize,
) -> eyre::Result<Option<NodeRef<T>>> {
    let mut rank = 1u32;
    for i in 0..n.child_count() {
        if let Some(ch) = n.child(i) {
            rank += ch.rank();
        }
    }
    n.set_rank(rank);
    Ok(Some(n.clone()))
}

/// Fluent builder for concurrent tree walks. See the module documentation.
pub struct Walker<T> {
    inner: Option<WalkerInner<T>>,
}

struct WalkerInner<T> {
    initial: NodeRef<T>,
    pipe: Arc<Pipeline<T>>,
}

impl<T> Clone for Walker<T> {
    fn clone(&self) -> Self {
        Walker {
            inner: self.inner.as_ref().map(|inner| WalkerInner {
                initial: inner.initial.clone(),
                pipe: inner.pipe.clone(),
            }),
        }
    }
}

impl<T: Send + Sync + 'static> Walker<T> {
    /// Creates a walker for the initial node of a (sub-)tree. The first
    /// subsequent builder call will receive this node as its input.
    ///
    /// With `None` as the initial node the result is a nil walker: a no-op
    /// pipeline producing an empty selection and an empty-tree error.
    pub fn new(initial: Option<NodeRef<T>>) -> Self {
        Walker {
            inner: initial.map(|initial| {
                debug!("new tree walker");
                WalkerInner {
                    initial,
                    pipe: Pipeline::new(),
                }
            }),
        }
    }

    /// Appends a stage for `task`. The first stage seeds the pipeline with
    /// the initial node and starts the shutdown watchdog.
    fn append_task(self, task: Task<T>, buffered: bool) -> Self {
        if let Some(inner) = &self.inner {
            if inner.pipe.is_promising() {
                inner.pipe.report(Report::new(WalkError::NoMoreFiltersAccepted));
            } else {
                if inner.pipe.is_empty() {
                    debug!("tree walker starts processing");
                    inner.pipe.push(inner.initial.clone(), 0);
                    inner.pipe.clone().start();
                }
                inner.pipe.append_stage(task, buffered);
            }
        }
        self
    }

    /// Selects the parent of the input node, if any.
    pub fn parent(self) -> Self {
        let task: Task<T> = Arc::new(|pkg: Package<T>, _from_buffer, ctx| {
            if let Some(p) = pkg.node.parent() {
                ctx.emit(p, pkg.serial);
            }
            Ok(())
        });
        self.append_task(task, false)
    }

    /// Walks up from the input node and selects the first ancestor matching
    /// the predicate. The search does not include the input node itself.
    pub fn ancestor_with<P>(self, predicate: P) -> Self
    where
        P: Fn(&NodeRef<T>, Option<&NodeRef<T>>) -> eyre::Result<Option<NodeRef<T>>>
            + Send
            + Sync
            + 'static,
    {
        let predicate: Predicate<T> = Arc::new(predicate);
        let task: Task<T> = Arc::new(move |pkg: Package<T>, _from_buffer, ctx| {
            let serial = pkg.serial;
            let mut ancestor = pkg.node.parent();
            while let Some(anc) = ancestor {
                if let Some(matched) = predicate(&anc, Some(&pkg.node))? {
                    ctx.emit(matched, serial);
                    return Ok(());
                }
                ancestor = anc.parent();
            }
            Ok(()) // no matching ancestor found, not an error
        });
        self.append_task(task, false)
    }

    /// Selects all descendents of the input node matching the predicate.
    /// The search does not include the input node itself.
    pub fn descendents_with<P>(self, predicate: P) -> Self
    where
        P: Fn(&NodeRef<T>, Option<&NodeRef<T>>) -> eyre::Result<Option<NodeRef<T>>>
            + Send
            + Sync
            + 'static,
    {
        let predicate: Predicate<T> = Arc::new(predicate);
        let task: Task<T> = Arc::new(move |pkg: Package<T>, from_buffer, ctx| {
            if from_buffer {
                let mut serial = pkg.serial;
                if serial == 0 {
                    serial = pkg.node.rank();
                }
                let matched = predicate(&pkg.node, None)?; // an error prunes this branch
                if let Some(matched) = matched {
                    ctx.emit(matched, serial);
                }
                revisit_children_of(&pkg.node, serial, ctx);
            } else {
                revisit_children_of(&pkg.node, pkg.serial, ctx);
            }
            Ok(())
        });
        self.append_task(task, true)
    }

    /// Selects all descendents of the input node. This is a wrapper around
    /// [`descendents_with`](Walker::descendents_with) with a match-anything
    /// predicate.
    pub fn all_descendents(self) -> Self {
        self.descendents_with(whatever())
    }

    /// Calls a client-provided predicate on each node of the selection,
    /// keeping the nodes the predicate returns.
    pub fn filter<P>(self, predicate: P) -> Self
    where
        P: Fn(&NodeRef<T>, Option<&NodeRef<T>>) -> eyre::Result<Option<NodeRef<T>>>
            + Send
            + Sync
            + 'static,
    {
        let predicate: Predicate<T> = Arc::new(predicate);
        let task: Task<T> = Arc::new(move |pkg: Package<T>, _from_buffer, ctx| {
            if let Some(node) = predicate(&pkg.node, Some(&pkg.node))? {
                ctx.emit(node, pkg.serial);
            }
            Ok(())
        });
        self.append_task(task, false)
    }

    /// Traverses the subtree below the input node, starting at (and
    /// including) the node itself, guaranteeing that parents are processed
    /// before their children.
    ///
    /// If the action returns an error for a node, descending below that node
    /// is aborted; siblings continue.
    pub fn top_down<A>(self, action: A) -> Self
    where
        A: Fn(&NodeRef<T>, Option<&NodeRef<T>>, usize) -> eyre::Result<Option<NodeRef<T>>>
            + Send
            + Sync
            + 'static,
    {
        let action: Action<T> = Arc::new(action);
        let task: Task<T> = Arc::new(move |pkg: Package<T>, from_buffer, ctx| {
            if from_buffer {
                let (parent, position) = match &pkg.local {
                    Local::Slot { parent, position } => (Some(parent.clone()), *position),
                    Local::None => (None, 0),
                };
                let mut serial = pkg.serial;
                if serial == 0 {
                    serial = pkg.node.rank();
                }
                let result = action(&pkg.node, parent.as_ref(), position)?; // error prunes the branch
                if let Some(result) = result {
                    ctx.emit(result, serial);
                }
                revisit_children_of(&pkg.node, serial, ctx);
            } else {
                // move incoming nodes over to the buffer queue
                ctx.buffer(pkg.node, Local::None, pkg.serial);
            }
            Ok(())
        });
        self.append_task(task, true)
    }

    /// Traverses upwards from (and including) the input nodes, guaranteeing
    /// that a parent is not processed before all of its children. Clients
    /// usually select the tree's leafs before chaining `bottom_up`.
    ///
    /// If the action returns an error for a node, the parent is processed
    /// regardless.
    pub fn bottom_up<A>(self, action: A) -> Self
    where
        A: Fn(&NodeRef<T>, Option<&NodeRef<T>>, usize) -> eyre::Result<Option<NodeRef<T>>>
            + Send
            + Sync
            + 'static,
    {
        let action: Action<T> = Arc::new(action);
        let ranks = Arc::new(RankMap::new());
        let task: Task<T> = Arc::new(move |pkg: Package<T>, from_buffer, ctx| {
            let child_count = pkg.node.child_count() as u32;
            if !from_buffer {
                // start nodes move over to the buffer queue, unless their
                // subtree has not been accounted for
                if child_count > 0 && ranks.get(&pkg.node) < child_count {
                    return Ok(());
                }
                ctx.buffer(pkg.node, Local::None, pkg.serial);
                return Ok(());
            }
            if child_count > 0 && !ranks.complete(&pkg.node, child_count) {
                // not all children processed yet; a later re-buffered copy
                // of this node will get its turn
                return Ok(());
            }
            let serial = pkg.serial;
            let parent = pkg.node.parent();
            let position = parent
                .as_ref()
                .and_then(|p| p.index_of(&pkg.node))
                .unwrap_or(0);
            let outcome = action(&pkg.node, parent.as_ref(), position);
            if let Ok(Some(result)) = &outcome {
                ctx.emit(result.clone(), serial);
            }
            if let Some(parent) = parent {
                // signal that one more child is done, then possibly continue
                // with the parent
                ranks.increment(&parent);
                ctx.buffer(parent, Local::None, serial);
            }
            outcome.map(|_| ())
        });
        self.append_task(task, true)
    }

    /// The future synchronization point of the walk.
    ///
    /// Obtaining the promise puts the walker into promise mode: no further
    /// builders are accepted. Calling [`Promise::wait`] blocks until all
    /// concurrent operations on the tree have finished and returns the
    /// selection together with the most recent error.
    pub fn promise(self) -> Promise<T> {
        let Some(inner) = self.inner else {
            return Promise::ready(Vec::new(), Some(Report::new(WalkError::EmptyTree)));
        };
        inner.pipe.enter_promise_mode();
        if inner.pipe.is_empty() {
            // nothing was ever scheduled; there is nothing to wait for
            return Promise::ready(Vec::new(), None);
        }
        let Some((results, errors)) = inner.pipe.take_sink() else {
            return Promise::ready(
                Vec::new(),
                Some(Report::new(WalkError::NoMoreFiltersAccepted)),
            );
        };
        let counter = inner.pipe.counter.clone();
        let handle = std::thread::spawn(move || {
            super::pipeline::wait_for_completion(results, errors, &counter)
        });
        Promise {
            state: PromiseState::Pending(handle),
        }
    }
}

/// Queues each child of `node` into the stage's buffer, deriving the child
/// serial from the parent serial and the ranks of the right siblings so that
/// document order is preserved once ranks have been assigned.
fn revisit_children_of<T: Send + Sync + 'static>(
    node: &NodeRef<T>,
    serial: u32,
    ctx: &TaskContext<'_, T>,
) {
    for position in 0..node.child_count() {
        if let Some(child) = node.child(position) {
            let child_serial = calc_child_serial(node, serial, position);
            ctx.buffer(
                child,
                Local::Slot {
                    parent: node.clone(),
                    position,
                },
                child_serial,
            );
        }
    }
}

/// Serial of the child at `position`: the parent serial minus one, minus the
/// accumulated ranks of all siblings to the right. Wrapping arithmetic: with
/// unset ranks serials are meaningless and the sink will not sort.
fn calc_child_serial<T>(node: &NodeRef<T>, serial: u32, position: usize) -> u32 {
    let mut r = serial.wrapping_sub(1);
    for i in (position + 1..node.child_count()).rev() {
        if let Some(child) = node.child(i) {
            r = r.wrapping_sub(child.rank());
        }
    }
    r
}

/// Future result of a tree walk, obtained from [`Walker::promise`].
pub struct Promise<T> {
    state: PromiseState<T>,
}

enum PromiseState<T> {
    Ready(Vec<NodeRef<T>>, Option<Report>),
    Pending(JoinHandle<(Vec<NodeRef<T>>, Option<Report>)>),
}

impl<T> Promise<T> {
    fn ready(selection: Vec<NodeRef<T>>, err: Option<Report>) -> Self {
        Promise {
            state: PromiseState::Ready(selection, err),
        }
    }

    /// Blocks until the pipeline has drained, then returns the selection and
    /// the most recent error.
    ///
    /// The selection is a set: duplicate node identities are collapsed. If
    /// any selected node carries a non-zero rank, the selection is sorted by
    /// ascending serial (ties keep encounter order).
    pub fn wait(self) -> (Vec<NodeRef<T>>, Option<Report>) {
        match self.state {
            PromiseState::Ready(selection, err) => (selection, err),
            PromiseState::Pending(handle) => handle
                .join()
                .unwrap_or_else(|_| (Vec::new(), Some(eyre!("result collector thread panicked")))),
        }
    }
}
