//! The dispatch boundary between the interpreter and module methods.
//!
//! [`call`] applies, in order: the instance's force override, the
//! unsupported-section rule, the worker's thread-instance lookup, the call
//! counters, the method itself, and validation of any `yield` it returns.
//! A valid yield produces a [`Suspended`] token which [`resume`] and
//! [`signal`] re-enter with the identical instance, thread instance and
//! request.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::module::MODULE_TARGET;
use crate::module::instance::{ModuleInstance, Step, Suspension};
use crate::module::section::Section;
use crate::module::thread::ThreadInstance;
use crate::rcode::Rcode;
use crate::request::Request;
use crate::unlang::io::Signal;

/// Outcome of a dispatch.
#[derive(Debug)]
pub enum Dispatch {
    /// The call finished with a result.
    Done(Rcode),
    /// The call suspended; resume it with [`resume`].
    Yielded(Suspended),
}

impl Dispatch {
    /// Result code as seen by the interpreter.
    #[must_use]
    pub const fn rcode(&self) -> Rcode {
        match self {
            Self::Done(rcode) => *rcode,
            Self::Yielded(_) => Rcode::Yield,
        }
    }
}

/// A module call suspended by `yield`.
///
/// While a token is alive it counts towards its thread instance's
/// [`active_callers`](ThreadInstance::active_callers).
pub struct Suspended {
    instance: Arc<ModuleInstance>,
    thread: Rc<ThreadInstance>,
    request: u64,
    section: Section,
    state: Option<Suspension>,
}

impl Suspended {
    fn new(
        instance: Arc<ModuleInstance>,
        thread: Rc<ThreadInstance>,
        request: u64,
        section: Section,
        state: Suspension,
    ) -> Self {
        thread.record_yield();
        Self {
            instance,
            thread,
            request,
            section,
            state: Some(state),
        }
    }

    /// Instance that yielded.
    #[must_use]
    pub const fn instance(&self) -> &Arc<ModuleInstance> {
        &self.instance
    }

    /// Thread instance the call is bound to.
    #[must_use]
    pub const fn thread(&self) -> &Rc<ThreadInstance> {
        &self.thread
    }

    /// Number of the request that yielded.
    #[must_use]
    pub const fn request(&self) -> u64 {
        self.request
    }

    /// Section being processed.
    #[must_use]
    pub const fn section(&self) -> Section {
        self.section
    }
}

impl Drop for Suspended {
    fn drop(&mut self) {
        self.thread.record_resumed();
    }
}

impl fmt::Debug for Suspended {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspended")
            .field("instance", &self.instance.name())
            .field("request", &self.request)
            .field("section", &self.section)
            .finish_non_exhaustive()
    }
}

/// Calls `instance`'s method for `section` on behalf of `request`.
pub fn call(instance: &Arc<ModuleInstance>, section: Section, request: &mut Request) -> Dispatch {
    if let Some(forced) = instance.forced() {
        debug!(
            target: MODULE_TARGET,
            instance = instance.name(),
            section = %section,
            request = request.number(),
            rcode = %forced,
            "returning forced result"
        );
        return Dispatch::Done(forced);
    }

    if !instance.supports(section) {
        return Dispatch::Done(Rcode::Noop);
    }

    let Some(thread) = thread_for(instance, request) else {
        return Dispatch::Done(Rcode::Fail);
    };
    thread.record_call();

    let step = {
        let Some(mut data) = thread.borrow_data() else {
            warn!(
                target: MODULE_TARGET,
                instance = instance.name(),
                request = request.number(),
                "thread data unavailable (detached or re-entered)"
            );
            return Dispatch::Done(Rcode::Fail);
        };
        instance
            .module()
            .call(instance.name(), section, &mut **data, request)
    };

    finish(Arc::clone(instance), thread, section, request, step)
}

/// Resumes a suspended call with the same instance and thread instance.
pub fn resume(mut token: Suspended, request: &mut Request) -> Dispatch {
    if token.request != request.number() {
        error!(
            target: MODULE_TARGET,
            instance = token.instance.name(),
            expected = token.request,
            request = request.number(),
            "resumed with a different request"
        );
        return Dispatch::Done(Rcode::Fail);
    }
    let Some(state) = token.state.take() else {
        return Dispatch::Done(Rcode::Fail);
    };

    let step = {
        let Some(mut data) = token.thread.borrow_data() else {
            warn!(
                target: MODULE_TARGET,
                instance = token.instance.name(),
                request = request.number(),
                "thread data unavailable on resume"
            );
            return Dispatch::Done(Rcode::Fail);
        };
        token.instance.module().resume(
            token.instance.name(),
            token.section,
            &mut **data,
            request,
            state,
        )
    };

    finish(
        Arc::clone(&token.instance),
        Rc::clone(&token.thread),
        token.section,
        request,
        step,
    )
}

/// Delivers `signal` to a suspended call.
///
/// Cancellation is terminal: the token is consumed and `None` returned.
/// Other signals hand the token back for a later [`resume`].
pub fn signal(mut token: Suspended, request: &mut Request, signal: Signal) -> Option<Suspended> {
    if let Some(state) = token.state.as_mut() {
        if let Some(mut data) = token.thread.borrow_data() {
            token.instance.module().signal(
                token.instance.name(),
                token.section,
                &mut **data,
                request,
                state,
                signal,
            );
        }
    }
    debug!(
        target: MODULE_TARGET,
        instance = token.instance.name(),
        request = request.number(),
        signal = %signal,
        "signal delivered"
    );
    if signal == Signal::Cancel {
        return None;
    }
    Some(token)
}

fn thread_for(instance: &Arc<ModuleInstance>, request: &Request) -> Option<Rc<ThreadInstance>> {
    let Some(el) = request.event_loop() else {
        error!(
            target: MODULE_TARGET,
            instance = instance.name(),
            request = request.number(),
            "request has no event loop"
        );
        return None;
    };
    match el.thread_instance(instance) {
        Ok(thread) => Some(thread),
        Err(error) => {
            error!(
                target: MODULE_TARGET,
                instance = instance.name(),
                request = request.number(),
                error = %error,
                "thread instance unavailable"
            );
            None
        }
    }
}

fn finish(
    instance: Arc<ModuleInstance>,
    thread: Rc<ThreadInstance>,
    section: Section,
    request: &Request,
    step: Step,
) -> Dispatch {
    let Step { rcode, suspension } = step;
    if rcode != Rcode::Yield {
        if suspension.is_some() {
            debug!(
                target: MODULE_TARGET,
                instance = instance.name(),
                rcode = %rcode,
                "discarding resume point of a call that did not yield"
            );
        }
        return Dispatch::Done(rcode);
    }

    if !instance.flags().resumable {
        error!(
            target: MODULE_TARGET,
            instance = instance.name(),
            section = %section,
            request = request.number(),
            "module is not resumable but returned yield"
        );
        return Dispatch::Done(Rcode::Fail);
    }
    let Some(state) = suspension else {
        error!(
            target: MODULE_TARGET,
            instance = instance.name(),
            section = %section,
            request = request.number(),
            "module returned yield without a resume point"
        );
        return Dispatch::Done(Rcode::Fail);
    };

    Dispatch::Yielded(Suspended::new(
        instance,
        thread,
        request.number(),
        section,
        state,
    ))
}
