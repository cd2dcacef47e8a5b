//! Call-tree recorder
//!
//! [`CallTraceRecorder`] is an [`AdviceListener`] that rebuilds each
//! observation root as a tree: one node per instrumented invocation, one
//! edge per nested call the invocation made, wall-clock timings taken at
//! the callbacks. Completed trees are delivered through a bounded channel
//! with a non-blocking send; if the consumer falls behind, trees are
//! dropped and counted rather than ever stalling the observed program.
//!
//! Builders ride along in the advice attachment slot, so the recorder
//! itself holds no per-thread state.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use call_scope_common::{CallTarget, MethodRef};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::debug;
use serde::Serialize;

use crate::advice::{Advice, AdviceListener, AdviceOutcome};
use crate::observer::{FlowSignal, ObserveResult};

/// One completed observation root
#[derive(Debug, Clone, Serialize)]
pub struct CallTrace {
    /// Process (call tree) ID the trace was recorded under
    pub process_id: u64,
    /// The outermost invocation
    pub root: CallNode,
}

/// One instrumented invocation inside a trace
#[derive(Debug, Clone, Serialize)]
pub struct CallNode {
    /// Invocation ID
    pub invoke_id: u64,
    /// `class#method` of the invocation
    pub method: String,
    /// Start offset from the trace root, microseconds
    pub start_us: u64,
    /// Wall-clock duration, microseconds
    pub duration_us: u64,
    /// How the invocation ended
    pub outcome: CallOutcome,
    /// Nested calls the invocation made, in program order
    pub calls: Vec<CallEdge>,
    /// Nested instrumented invocations
    pub children: Vec<CallNode>,
}

/// Recorded outcome of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Returned normally
    Returned,
    /// Raised an error of this type
    Raised { error_type: String },
    /// The terminal callback never arrived (redirected or still running
    /// when the trace was frozen)
    Incomplete,
}

/// One nested call made by an invocation
#[derive(Debug, Clone, Serialize)]
pub struct CallEdge {
    /// Call-site line
    pub line: u32,
    /// `class#method` of the callee
    pub callee: String,
    /// Error type the callee raised, if it raised
    pub error_type: Option<String>,
}

/// In-flight node state, attached to the advice while the call is open
struct NodeBuilder {
    invoke_id: u64,
    method: String,
    /// Start instant of the trace root, shared down the tree
    epoch: Instant,
    start_us: u64,
    duration_us: u64,
    outcome: CallOutcome,
    calls: Vec<CallEdge>,
    children: Vec<Rc<RefCell<NodeBuilder>>>,
}

impl NodeBuilder {
    fn freeze(&self) -> CallNode {
        CallNode {
            invoke_id: self.invoke_id,
            method: self.method.clone(),
            start_us: self.start_us,
            duration_us: self.duration_us,
            outcome: self.outcome.clone(),
            calls: self.calls.clone(),
            children: self
                .children
                .iter()
                .map(|child| child.borrow().freeze())
                .collect(),
        }
    }
}

fn elapsed_us(epoch: Instant) -> u64 {
    u64::try_from(epoch.elapsed().as_micros()).unwrap_or(u64::MAX)
}

fn render_method(method: &MethodRef) -> String {
    format!("{}#{}", method.class_name, method.method_name)
}

fn render_callee(target: &CallTarget) -> String {
    format!("{}#{}", target.class_name, target.method_name)
}

/// Advice listener that records call trees
pub struct CallTraceRecorder {
    sink: Sender<CallTrace>,
    dropped: AtomicUsize,
}

impl CallTraceRecorder {
    /// Record into an existing channel.
    #[must_use]
    pub fn new(sink: Sender<CallTrace>) -> Self {
        CallTraceRecorder {
            sink,
            dropped: AtomicUsize::new(0),
        }
    }

    /// Recorder plus a bounded receiving end, in one call.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, Receiver<CallTrace>) {
        let (sender, receiver) = bounded(capacity);
        (CallTraceRecorder::new(sender), receiver)
    }

    /// Number of completed traces dropped because the channel was full.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn builder_of(advice: &Advice) -> Option<Rc<RefCell<NodeBuilder>>> {
        advice.attachment::<RefCell<NodeBuilder>>()
    }
}

impl AdviceListener for CallTraceRecorder {
    fn before(&self, advice: &Advice) -> ObserveResult {
        let parent = if advice.is_process_top() {
            None
        } else {
            advice.parent().and_then(|parent| Self::builder_of(&parent))
        };

        let (epoch, start_us) = match &parent {
            Some(parent) => {
                let epoch = parent.borrow().epoch;
                (epoch, elapsed_us(epoch))
            }
            // Root of the tree, or an orphan whose parent went unobserved:
            // either way this node starts a fresh timeline.
            None => (Instant::now(), 0),
        };

        advice.attach(RefCell::new(NodeBuilder {
            invoke_id: advice.invoke_id().0,
            method: render_method(advice.method()),
            epoch,
            start_us,
            duration_us: 0,
            outcome: CallOutcome::Incomplete,
            calls: Vec::new(),
            children: Vec::new(),
        }));

        if let (Some(parent), Some(node)) = (parent, Self::builder_of(advice)) {
            parent.borrow_mut().children.push(node);
        }
        Ok(FlowSignal::none())
    }

    fn after(&self, advice: &Advice) -> ObserveResult {
        let Some(node) = Self::builder_of(advice) else {
            return Ok(FlowSignal::none());
        };
        {
            let mut builder = node.borrow_mut();
            builder.duration_us = elapsed_us(builder.epoch).saturating_sub(builder.start_us);
            builder.outcome = match advice.outcome() {
                AdviceOutcome::Returned(_) => CallOutcome::Returned,
                AdviceOutcome::Raised(error) => CallOutcome::Raised {
                    error_type: error.type_name().to_string(),
                },
                AdviceOutcome::Pending => CallOutcome::Incomplete,
            };
        }

        if advice.is_process_top() {
            let trace = CallTrace {
                process_id: advice.process_id().0,
                root: node.borrow().freeze(),
            };
            if self.sink.try_send(trace).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("trace channel full, dropping completed call tree");
            }
        }
        Ok(FlowSignal::none())
    }

    fn before_call(&self, advice: &Advice, target: &CallTarget) -> ObserveResult {
        if let Some(node) = Self::builder_of(advice) {
            node.borrow_mut().calls.push(CallEdge {
                line: target.line,
                callee: render_callee(target),
                error_type: None,
            });
        }
        Ok(FlowSignal::none())
    }

    fn after_call_throwing(
        &self,
        advice: &Advice,
        _target: &CallTarget,
        error_type: &str,
    ) -> ObserveResult {
        if let Some(node) = Self::builder_of(advice) {
            if let Some(edge) = node.borrow_mut().calls.last_mut() {
                edge.error_type = Some(error_type.to_string());
            }
        }
        Ok(FlowSignal::none())
    }
}
