//! Policy interpreter.
//!
//! Virtual-server sections compile to [`Program`]s. A request executes a
//! program through its stack of frames: the last frame pushed runs first,
//! and a frame marked as the top frame ends interpretation when it
//! finishes. Module calls that yield leave their frame on the stack holding
//! the [`Suspended`] token, so the next [`interpret`] resumes exactly that
//! call.

pub mod io;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::module::dispatch::{self, Dispatch, Suspended};
use crate::module::{ModuleInstance, Section};
use crate::rcode::Rcode;
use crate::request::{MasterState, Request};
use crate::virtual_server::VirtualServer;

use self::io::{ChildSpec, IoAction, IoFinal, Signal, spawn};

const UNLANG_TARGET: &str = "rad_server::unlang";

/// Compiled instruction list.
pub type Program = Arc<[Instruction]>;

/// One compiled policy instruction.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Call a module instance's method for a section.
    Module {
        /// Instance to call.
        instance: Arc<ModuleInstance>,
        /// Section whose method is called.
        section: Section,
    },
    /// Run a nested list and use its merged result.
    Group(Program),
    /// Literal result keyword.
    Rcode(Rcode),
    /// Run a list in a child request and wait for it.
    Subrequest(SubrequestSpec),
    /// Run a list in a detachable child tracked by the worker.
    Detach(Program),
}

/// Parameters of a [`Instruction::Subrequest`].
#[derive(Debug, Clone)]
pub struct SubrequestSpec {
    /// Instructions the child runs.
    pub program: Program,
    /// Virtual server override; the parent's when `None`.
    pub server: Option<Arc<VirtualServer>>,
    /// Namespace override; the parent's when `None`.
    pub namespace: Option<String>,
}

/// Position within a program.
#[derive(Debug, Clone)]
pub struct Cursor {
    program: Program,
    index: usize,
}

impl Cursor {
    /// Cursor at the first instruction of `program`.
    #[must_use]
    pub const fn new(program: Program) -> Self {
        Self { program, index: 0 }
    }

    /// Cursor at instruction `index` of `program`.
    #[must_use]
    pub const fn at(program: Program, index: usize) -> Self {
        Self { program, index }
    }

    /// Instruction under the cursor.
    #[must_use]
    pub fn current(&self) -> Option<&Instruction> {
        self.program.get(self.index)
    }

    /// Index of the instruction under the cursor.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    const fn advance(&mut self) {
        self.index = self.index.saturating_add(1);
    }
}

enum FrameState {
    Fresh,
    Module(Suspended),
    Child(Box<Request>),
    Waiting,
    ChildDone(Rcode),
}

/// One activation on a request's execution stack.
pub(crate) struct Frame {
    cursor: Cursor,
    result: Rcode,
    next_sibling: bool,
    top_frame: bool,
    state: FrameState,
}

impl Frame {
    pub(crate) const fn new(
        cursor: Cursor,
        default_rcode: Rcode,
        next_sibling: bool,
        top_frame: bool,
    ) -> Self {
        Self {
            cursor,
            result: default_rcode,
            next_sibling,
            top_frame,
            state: FrameState::Fresh,
        }
    }
}

/// A request's execution stack.
#[derive(Default)]
pub(crate) struct Stack {
    frames: Vec<Frame>,
}

impl Stack {
    pub(crate) fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    fn clear(&mut self) -> usize {
        let depth = self.frames.len();
        self.frames.clear();
        depth
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("depth", &self.frames.len())
            .finish()
    }
}

enum Outcome {
    Done(Rcode),
    Yield,
    Push(Frame),
}

enum Exec {
    Rcode(Rcode),
    Yield(FrameState),
    Push(Frame),
}

impl From<Dispatch> for Exec {
    fn from(dispatch: Dispatch) -> Self {
        match dispatch {
            Dispatch::Done(rcode) => Self::Rcode(rcode),
            Dispatch::Yielded(token) => Self::Yield(FrameState::Module(token)),
        }
    }
}

/// Runs `request`'s stack until the top frame finishes or a module yields.
///
/// Returns the top frame's merged result, [`Rcode::Yield`] if a call is
/// suspended, or [`Rcode::Fail`] once the request is told to stop
/// processing. A stopped request's suspended call is sent
/// [`Signal::Cancel`] before the stack is unwound.
pub fn interpret(request: &mut Request) -> Rcode {
    loop {
        if request.master_state() == MasterState::StopProcessing {
            return unwind_stopped(request);
        }
        let Some(mut frame) = request.stack_mut().pop() else {
            return request.rcode();
        };

        match step(&mut frame, request) {
            Outcome::Yield => {
                request.stack_mut().push(frame);
                if request.master_state() == MasterState::StopProcessing {
                    return unwind_stopped(request);
                }
                return Rcode::Yield;
            }
            Outcome::Push(child) => {
                frame.state = FrameState::Waiting;
                request.stack_mut().push(frame);
                request.stack_mut().push(child);
            }
            Outcome::Done(rcode) => {
                if frame.top_frame {
                    request.set_rcode(rcode);
                    return rcode;
                }
                match request.stack_mut().top_mut() {
                    Some(parent) => parent.state = FrameState::ChildDone(rcode),
                    None => {
                        request.set_rcode(rcode);
                        return rcode;
                    }
                }
            }
        }
    }
}

fn unwind_stopped(request: &mut Request) -> Rcode {
    deliver(request, Signal::Cancel);
    let unwound = request.stack_mut().clear();
    debug!(
        target: UNLANG_TARGET,
        request = request.number(),
        frames = unwound,
        "stop processing"
    );
    request.set_rcode(Rcode::Fail);
    Rcode::Fail
}

fn step(frame: &mut Frame, request: &mut Request) -> Outcome {
    let mut resumed = match std::mem::replace(&mut frame.state, FrameState::Fresh) {
        FrameState::Fresh => None,
        FrameState::Module(token) => Some(Exec::from(dispatch::resume(token, request))),
        FrameState::Child(child) => Some(drive_child(*child, IoAction::Run)),
        FrameState::ChildDone(rcode) => Some(Exec::Rcode(rcode)),
        FrameState::Waiting => {
            warn!(
                target: UNLANG_TARGET,
                request = request.number(),
                "frame lost its child frame"
            );
            Some(Exec::Rcode(Rcode::Fail))
        }
    };

    loop {
        let exec = match resumed.take() {
            Some(exec) => exec,
            None => {
                let program = Arc::clone(&frame.cursor.program);
                let Some(instruction) = program.get(frame.cursor.index) else {
                    return Outcome::Done(frame.result);
                };
                execute(instruction, request)
            }
        };

        let rcode = match exec {
            Exec::Rcode(rcode) => rcode,
            Exec::Yield(state) => {
                frame.state = state;
                return Outcome::Yield;
            }
            Exec::Push(child) => return Outcome::Push(child),
        };

        frame.result = frame.result.merge(rcode);
        frame.cursor.advance();
        if rcode.returns_early() || !frame.next_sibling || frame.cursor.current().is_none() {
            return Outcome::Done(frame.result);
        }
    }
}

fn execute(instruction: &Instruction, request: &mut Request) -> Exec {
    match instruction {
        Instruction::Module { instance, section } => {
            Exec::from(dispatch::call(instance, *section, request))
        }
        Instruction::Group(program) => Exec::Push(Frame::new(
            Cursor::new(Arc::clone(program)),
            Rcode::Noop,
            true,
            false,
        )),
        Instruction::Rcode(rcode) => Exec::Rcode(*rcode),
        Instruction::Subrequest(spec) => {
            let child = spawn(
                request,
                ChildSpec {
                    instruction: Cursor::new(Arc::clone(&spec.program)),
                    server: spec.server.clone(),
                    namespace: spec.namespace.clone(),
                    default_rcode: Rcode::Noop,
                    next_sibling: true,
                    detachable: false,
                },
            );
            match child {
                Some(child) => drive_child(child, IoAction::Run),
                None => {
                    warn!(
                        target: UNLANG_TARGET,
                        request = request.number(),
                        "failed to spawn subrequest"
                    );
                    Exec::Rcode(Rcode::Fail)
                }
            }
        }
        Instruction::Detach(program) => detach(program, request),
    }
}

fn drive_child(mut child: Request, action: IoAction) -> Exec {
    match child.process(action) {
        IoFinal::Yield => Exec::Yield(FrameState::Child(Box::new(child))),
        IoFinal::Done | IoFinal::Reply => Exec::Rcode(child.rcode()),
    }
}

fn detach(program: &Program, request: &mut Request) -> Exec {
    let spec = ChildSpec {
        instruction: Cursor::new(Arc::clone(program)),
        server: None,
        namespace: None,
        default_rcode: Rcode::Noop,
        next_sibling: true,
        detachable: true,
    };
    let Some(mut child) = spawn(request, spec) else {
        warn!(
            target: UNLANG_TARGET,
            request = request.number(),
            "failed to spawn detached request"
        );
        return Exec::Rcode(Rcode::Fail);
    };
    if child.process(IoAction::Run) == IoFinal::Yield {
        if let Some(el) = request.event_loop() {
            el.track(child);
        }
    }
    Exec::Rcode(Rcode::Noop)
}

/// Delivers `signal` to the frame at the top of `request`'s stack.
///
/// [`Signal::Cancel`] is terminal: the suspended call (or waiting child) is
/// released and the whole stack unwound.
pub fn signal(request: &mut Request, signal: Signal) {
    deliver(request, signal);
    if signal == Signal::Cancel {
        let unwound = request.stack_mut().clear();
        debug!(
            target: UNLANG_TARGET,
            request = request.number(),
            frames = unwound,
            "request cancelled"
        );
    }
}

fn deliver(request: &mut Request, signal: Signal) {
    if let Some(mut frame) = request.stack_mut().pop() {
        match std::mem::replace(&mut frame.state, FrameState::Fresh) {
            FrameState::Module(token) => {
                if let Some(kept) = dispatch::signal(token, request, signal) {
                    frame.state = FrameState::Module(kept);
                }
            }
            FrameState::Child(mut child) => {
                child.process(IoAction::Signal(signal));
                if signal != Signal::Cancel {
                    frame.state = FrameState::Child(child);
                }
            }
            other => frame.state = other,
        }
        request.stack_mut().push(frame);
    }
}
