//! Requests: the unit of protocol work a worker drives.
//!
//! A request is either external (created by the network layer, processed by
//! its virtual server's protocol function) or a child spawned by the
//! interpreter (marked *fake*, processed only by
//! [`process_interpret`](crate::unlang::io::process_interpret)). Both kinds
//! carry an [`AsyncContext`] that links them to their worker's event loop,
//! their listener and their receive-time tracker.

mod pairs;

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::event::{DetachedSlot, EventLoop, EventLoopRef};
use crate::module::Section;
use crate::rcode::Rcode;
use crate::unlang::io::{IoAction, IoFinal, IoState, process_interpret};
use crate::unlang::{Cursor, Frame, Stack};
use crate::virtual_server::VirtualServer;

pub use self::pairs::{Pair, PairList};

/// Namespace used when neither the caller nor a virtual server names one.
pub const DEFAULT_NAMESPACE: &str = "radius";

/// Function a request is driven through.
pub type ProcessFn = fn(&mut Request, IoAction) -> IoFinal;

/// Network endpoint a request arrived on. Owned by the network layer;
/// requests only refer to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    name: String,
}

impl Listener {
    /// Creates a listener description.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Listener name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Coarse processing state of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum MasterState {
    /// Processing normally.
    #[default]
    Running,
    /// Processing must stop at the next opportunity.
    StopProcessing,
}

/// Linkage between a request and the I/O layer driving it.
pub struct AsyncContext {
    listener: Weak<Listener>,
    recv_time: Rc<Cell<Instant>>,
    original_recv_time: Rc<Cell<Instant>>,
    fake: bool,
    detachable: bool,
    process: ProcessFn,
    state: IoState,
    // Releases the worker's tracking slot when the request is dropped.
    slot: Option<DetachedSlot>,
}

impl AsyncContext {
    fn new(recv_time: Instant, process: ProcessFn) -> Self {
        let tracker = Rc::new(Cell::new(recv_time));
        Self {
            listener: Weak::new(),
            original_recv_time: Rc::clone(&tracker),
            recv_time: tracker,
            fake: false,
            detachable: false,
            process,
            state: IoState::Runnable,
            slot: None,
        }
    }
}

impl fmt::Debug for AsyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncContext")
            .field("listener", &self.listener.upgrade().map(|l| l.name.clone()))
            .field("recv_time", &self.recv_time.get())
            .field("fake", &self.fake)
            .field("detachable", &self.detachable)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// A unit of protocol work.
pub struct Request {
    number: u64,
    namespace: String,
    server: Option<Arc<VirtualServer>>,
    section: Option<Section>,
    el: EventLoopRef,
    async_ctx: AsyncContext,
    stack: Stack,
    master_state: MasterState,
    rcode: Rcode,
    packet: PairList,
    reply: PairList,
    control: PairList,
}

impl Request {
    /// Creates an external request on `el`, received now.
    #[must_use]
    pub fn new(number: u64, el: &EventLoop) -> Self {
        Self {
            number,
            namespace: DEFAULT_NAMESPACE.to_owned(),
            server: None,
            section: None,
            el: el.downgrade(),
            async_ctx: AsyncContext::new(Instant::now(), process_interpret),
            stack: Stack::default(),
            master_state: MasterState::Running,
            rcode: Rcode::Noop,
            packet: PairList::new(),
            reply: PairList::new(),
            control: PairList::new(),
        }
    }

    /// Sets the listener the request arrived on.
    #[must_use]
    pub fn with_listener(mut self, listener: &Arc<Listener>) -> Self {
        self.async_ctx.listener = Arc::downgrade(listener);
        self
    }

    /// Sets the namespace (dictionary context).
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Binds the request to a virtual server and adopts its namespace.
    #[must_use]
    pub fn with_server(mut self, server: Arc<VirtualServer>) -> Self {
        server.namespace().clone_into(&mut self.namespace);
        self.server = Some(server);
        self
    }

    /// Records the section being processed.
    #[must_use]
    pub const fn with_section(mut self, section: Section) -> Self {
        self.section = Some(section);
        self
    }

    /// Replaces the process function.
    #[must_use]
    pub const fn with_process(mut self, process: ProcessFn) -> Self {
        self.async_ctx.process = process;
        self
    }

    /// Sets the receive time.
    #[must_use]
    pub fn with_recv_time(self, recv_time: Instant) -> Self {
        self.async_ctx.recv_time.set(recv_time);
        self
    }

    /// Replaces the request attribute list.
    #[must_use]
    pub fn with_packet(mut self, packet: PairList) -> Self {
        self.packet = packet;
        self
    }

    /// Builds a child of `parent`: same number, event loop, listener and
    /// section, but its own receive-time tracker seeded from the parent's,
    /// its own stack and its own attribute lists.
    pub(crate) fn new_child(
        parent: &Self,
        server: Option<Arc<VirtualServer>>,
        namespace: Option<String>,
        slot: Option<DetachedSlot>,
        process: ProcessFn,
    ) -> Self {
        let mut async_ctx = AsyncContext::new(parent.recv_time(), process);
        async_ctx.listener = Weak::clone(&parent.async_ctx.listener);
        async_ctx.fake = true;
        async_ctx.detachable = slot.is_some();
        async_ctx.slot = slot;

        let server = server.or_else(|| parent.server.clone());
        let namespace = namespace.unwrap_or_else(|| parent.namespace.clone());
        Self {
            number: parent.number,
            namespace,
            server,
            section: parent.section,
            el: parent.el.clone(),
            async_ctx,
            stack: Stack::default(),
            master_state: MasterState::Running,
            rcode: Rcode::Noop,
            packet: parent.packet.clone(),
            reply: PairList::new(),
            control: parent.control.clone(),
        }
    }

    /// Request number; children share their parent's.
    #[must_use]
    pub const fn number(&self) -> u64 {
        self.number
    }

    /// Namespace (dictionary context).
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Virtual server the request runs in, if any.
    #[must_use]
    pub const fn server(&self) -> Option<&Arc<VirtualServer>> {
        self.server.as_ref()
    }

    /// Section being processed, if known.
    #[must_use]
    pub const fn section(&self) -> Option<Section> {
        self.section
    }

    /// Worker event loop, if it is still running.
    #[must_use]
    pub fn event_loop(&self) -> Option<EventLoop> {
        self.el.upgrade()
    }

    /// Listener the request arrived on, if it still exists.
    #[must_use]
    pub fn listener(&self) -> Option<Arc<Listener>> {
        self.async_ctx.listener.upgrade()
    }

    /// Receive time.
    #[must_use]
    pub fn recv_time(&self) -> Instant {
        self.async_ctx.recv_time.get()
    }

    /// Updates the receive time.
    pub fn set_recv_time(&self, recv_time: Instant) {
        self.async_ctx.recv_time.set(recv_time);
    }

    /// Receive time as seen by the request's original-time tracker, which
    /// always points at this request's own copy.
    #[must_use]
    pub fn original_recv_time(&self) -> Instant {
        self.async_ctx.original_recv_time.get()
    }

    /// Returns `true` when both requests track receive time in the same
    /// cell.
    #[must_use]
    pub fn shares_recv_time_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.async_ctx.recv_time, &other.async_ctx.recv_time)
            || Rc::ptr_eq(
                &self.async_ctx.original_recv_time,
                &other.async_ctx.recv_time,
            )
    }

    /// Returns `true` for children spawned by the interpreter.
    #[must_use]
    pub const fn is_fake(&self) -> bool {
        self.async_ctx.fake
    }

    /// Returns `true` for children that may outlive their spawning call.
    #[must_use]
    pub const fn is_detachable(&self) -> bool {
        self.async_ctx.detachable
    }

    /// Execution state seen by the I/O layer.
    #[must_use]
    pub const fn io_state(&self) -> IoState {
        self.async_ctx.state
    }

    pub(crate) const fn set_io_state(&mut self, state: IoState) {
        self.async_ctx.state = state;
    }

    /// Drives the request through its process function.
    pub fn process(&mut self, action: IoAction) -> IoFinal {
        let process = self.async_ctx.process;
        process(self, action)
    }

    /// Coarse processing state.
    #[must_use]
    pub const fn master_state(&self) -> MasterState {
        self.master_state
    }

    /// Asks the interpreter to stop at the next opportunity.
    pub const fn stop_processing(&mut self) {
        self.master_state = MasterState::StopProcessing;
    }

    /// Final result of the last completed interpretation.
    #[must_use]
    pub const fn rcode(&self) -> Rcode {
        self.rcode
    }

    pub(crate) const fn set_rcode(&mut self, rcode: Rcode) {
        self.rcode = rcode;
    }

    /// Number of frames on the execution stack.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.depth()
    }

    pub(crate) const fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    /// Pushes a frame that runs `cursor`'s instruction (and, with
    /// `next_sibling`, those after it). A `top_frame` ends interpretation
    /// when it finishes.
    pub fn push_instruction(
        &mut self,
        cursor: Cursor,
        default_rcode: Rcode,
        next_sibling: bool,
        top_frame: bool,
    ) {
        self.stack
            .push(Frame::new(cursor, default_rcode, next_sibling, top_frame));
    }

    /// Attributes received with the request.
    #[must_use]
    pub const fn packet(&self) -> &PairList {
        &self.packet
    }

    /// Mutable request attributes.
    pub const fn packet_mut(&mut self) -> &mut PairList {
        &mut self.packet
    }

    /// Attributes to send in the reply.
    #[must_use]
    pub const fn reply(&self) -> &PairList {
        &self.reply
    }

    /// Mutable reply attributes.
    pub const fn reply_mut(&mut self) -> &mut PairList {
        &mut self.reply
    }

    /// Server-side control attributes.
    #[must_use]
    pub const fn control(&self) -> &PairList {
        &self.control
    }

    /// Mutable control attributes.
    pub const fn control_mut(&mut self) -> &mut PairList {
        &mut self.control
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("number", &self.number)
            .field("namespace", &self.namespace)
            .field("server", &self.server.as_ref().map(|s| s.name().to_owned()))
            .field("section", &self.section)
            .field("async", &self.async_ctx)
            .field("stack_depth", &self.stack.depth())
            .field("master_state", &self.master_state)
            .field("rcode", &self.rcode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
