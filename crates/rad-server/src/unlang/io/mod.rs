//! Interpreter shim and child request allocator.
//!
//! Child requests never run a protocol's process function: [`spawn`] binds
//! them to [`process_interpret`], which only translates I/O actions into
//! interpreter calls and never writes a reply.

use std::sync::Arc;

use strum::Display;
use tracing::{debug, trace};

use crate::rcode::Rcode;
use crate::request::{MasterState, Request};
use crate::unlang::{Cursor, UNLANG_TARGET, interpret};
use crate::virtual_server::VirtualServer;

/// Out-of-band event delivered to a suspended request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Signal {
    /// Stop processing and release resources. Terminal.
    Cancel,
    /// A deadline passed.
    Timeout,
    /// A duplicate of the request arrived.
    Dup,
    /// The request is being detached from its parent.
    Detach,
}

/// What the I/O layer asks of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoAction {
    /// Continue interpreting.
    Run,
    /// Deliver a signal.
    Signal(Signal),
}

/// What a process function tells the I/O layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFinal {
    /// Nothing more to do for this request.
    Done,
    /// Waiting on an event; drive again with [`IoAction::Run`] later.
    Yield,
    /// A reply is ready to send.
    Reply,
}

/// Execution state of a request as seen by its process function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum IoState {
    /// Ready to run.
    #[default]
    Runnable,
    /// Suspended until the next `run`.
    Yielded,
    /// Finished; further actions are ignored.
    Done,
}

/// Process function for child requests.
///
/// * Once the request is [`IoState::Done`] every action is ignored.
/// * A signal goes to the interpreter's top frame and the call returns
///   [`IoFinal::Done`] without stepping. Cancellation also makes the request
///   terminal.
/// * `run` interprets; a stop-processing request or any result other than
///   `yield` finishes the request.
pub fn process_interpret(request: &mut Request, action: IoAction) -> IoFinal {
    if request.io_state() == IoState::Done {
        trace!(
            target: UNLANG_TARGET,
            request = request.number(),
            ?action,
            "ignoring action for finished request"
        );
        return IoFinal::Done;
    }

    if let IoAction::Signal(signal) = action {
        crate::unlang::signal(request, signal);
        if signal == Signal::Cancel {
            request.set_io_state(IoState::Done);
        }
        return IoFinal::Done;
    }

    request.set_io_state(IoState::Runnable);
    let rcode = interpret(request);

    if request.master_state() == MasterState::StopProcessing {
        request.set_io_state(IoState::Done);
        return IoFinal::Done;
    }
    if rcode == Rcode::Yield {
        request.set_io_state(IoState::Yielded);
        return IoFinal::Yield;
    }
    request.set_io_state(IoState::Done);
    IoFinal::Done
}

/// Parameters for [`spawn`].
#[derive(Debug, Clone)]
pub struct ChildSpec {
    /// Instruction the child starts at.
    pub instruction: Cursor,
    /// Virtual server override; the parent's when `None`.
    pub server: Option<Arc<VirtualServer>>,
    /// Namespace override; the parent's when `None`.
    pub namespace: Option<String>,
    /// Result the child's frame starts with.
    pub default_rcode: Rcode,
    /// Keep running the instructions after `instruction`.
    pub next_sibling: bool,
    /// Allow the child to outlive the spawning call.
    pub detachable: bool,
}

/// Creates a child of `parent` that will run `spec.instruction`.
///
/// The child shares the parent's number, event loop and listener, starts
/// from a copy of the parent's receive time held in its own tracker, and is
/// bound to [`process_interpret`]. Its stack holds a single top frame.
///
/// Returns `None` when the parent's event loop has gone or, for detachable
/// children, when the worker's detached-request list is full. Callers treat
/// that as a failure of the enclosing instruction.
#[must_use]
pub fn spawn(parent: &Request, spec: ChildSpec) -> Option<Request> {
    let el = parent.event_loop()?;
    let slot = if spec.detachable {
        Some(el.reserve_detached()?)
    } else {
        None
    };

    let mut child = Request::new_child(parent, spec.server, spec.namespace, slot, process_interpret);
    child.push_instruction(spec.instruction, spec.default_rcode, spec.next_sibling, true);
    debug!(
        target: UNLANG_TARGET,
        request = child.number(),
        worker = el.worker(),
        namespace = child.namespace(),
        detachable = spec.detachable,
        "spawned child request"
    );
    Some(child)
}
