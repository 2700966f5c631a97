//! Module kinds used by the unit and behaviour tests.
//!
//! * `counter` counts calls on the instance and on each worker and answers
//!   with its configured `result`.
//! * `pause` is resumable: it yields on entry and finishes after `rounds`
//!   resumptions, recording every signal it receives.
//! * `serial` is thread-unsafe and records overlapping calls.
//! * `rogue` claims nothing but returns `yield` anyway.
//! * `stuck` refuses to create thread data.

use std::any::Any;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use rad_config::ConfigSection;

use crate::error::{LifecyclePhase, ModuleError};
use crate::event::EventLoop;
use crate::lifecycle::StructuredLifecycleReporter;
use crate::module::{MethodCtx, ModuleDescriptor, ModuleFlags, ModuleRegistry, Section};
use crate::rcode::Rcode;
use crate::request::Request;
use crate::unlang::io::Signal;
use crate::unlang::{Instruction, Program};

// ---------------------------------------------------------------------------
// counter
// ---------------------------------------------------------------------------

/// Instance data of the `counter` module.
pub(crate) struct Counter {
    result: Rcode,
    calls: AtomicU64,
    detached: Arc<AtomicUsize>,
}

impl Counter {
    pub(crate) fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn detached(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }
}

/// Thread data of the `counter` module.
#[derive(Default)]
pub(crate) struct CounterThread {
    pub(crate) calls: u64,
    detached: Arc<AtomicUsize>,
}

fn counter_bootstrap(config: &ConfigSection) -> Result<Counter, ModuleError> {
    let result = config
        .parse_or("result", Rcode::Ok)
        .map_err(|error| ModuleError::config(config.name(), error))?;
    Ok(Counter {
        result,
        calls: AtomicU64::new(0),
        detached: Arc::new(AtomicUsize::new(0)),
    })
}

fn counter_instantiate(_data: &mut Counter, config: &ConfigSection) -> Result<(), ModuleError> {
    let refuse = config
        .bool_or("refuse", false)
        .map_err(|error| ModuleError::config(config.name(), error))?;
    if refuse {
        return Err(ModuleError::lifecycle(
            config.name(),
            LifecyclePhase::Instantiate,
            "refused by configuration",
        ));
    }
    Ok(())
}

fn counter_thread(
    _config: &ConfigSection,
    instance: &Counter,
    _el: &EventLoop,
) -> Result<CounterThread, ModuleError> {
    Ok(CounterThread {
        calls: 0,
        detached: Arc::clone(&instance.detached),
    })
}

fn counter_detach(thread: CounterThread) -> Result<(), ModuleError> {
    thread.detached.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

fn counter_call(ctx: &mut MethodCtx<'_, Counter, CounterThread>, request: &mut Request) -> Rcode {
    ctx.instance().calls.fetch_add(1, Ordering::SeqCst);
    ctx.thread().calls += 1;
    request.control_mut().add("Counter-Hit", ctx.name());
    ctx.instance().result
}

pub(crate) fn counter_module() -> ModuleDescriptor<Counter, CounterThread> {
    ModuleDescriptor::new("counter", counter_bootstrap)
        .with_instantiate(counter_instantiate)
        .with_thread_instantiate(counter_thread)
        .with_thread_detach(counter_detach)
        .with_method(Section::Authenticate, counter_call)
        .with_method(Section::Authorize, counter_call)
        .with_method(Section::Accounting, counter_call)
        .with_method(Section::PostAuth, counter_call)
}

// ---------------------------------------------------------------------------
// pause
// ---------------------------------------------------------------------------

/// Instance data of the `pause` module.
pub(crate) struct Pause {
    rounds: u32,
    started: AtomicU64,
    resumed: AtomicU64,
    signals: Mutex<Vec<Signal>>,
}

impl Pause {
    pub(crate) fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn resumed(&self) -> u64 {
        self.resumed.load(Ordering::SeqCst)
    }

    pub(crate) fn signals(&self) -> Vec<Signal> {
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn pause_bootstrap(config: &ConfigSection) -> Result<Pause, ModuleError> {
    let rounds = config
        .parse_or("rounds", 1_u32)
        .map_err(|error| ModuleError::config(config.name(), error))?;
    Ok(Pause {
        rounds,
        started: AtomicU64::new(0),
        resumed: AtomicU64::new(0),
        signals: Mutex::new(Vec::new()),
    })
}

fn pause_call(ctx: &mut MethodCtx<'_, Pause, ()>, request: &mut Request) -> Rcode {
    ctx.instance().started.fetch_add(1, Ordering::SeqCst);
    request.control_mut().add("Pause-Started", ctx.name());
    ctx.yield_to(pause_resume, Some(pause_signal), 0_u32)
}

fn pause_resume(
    ctx: &mut MethodCtx<'_, Pause, ()>,
    _request: &mut Request,
    rctx: &mut dyn Any,
) -> Rcode {
    let Some(done) = rctx.downcast_mut::<u32>() else {
        return Rcode::Fail;
    };
    ctx.instance().resumed.fetch_add(1, Ordering::SeqCst);
    *done += 1;
    if *done < ctx.instance().rounds {
        let so_far = *done;
        return ctx.yield_to(pause_resume, Some(pause_signal), so_far);
    }
    Rcode::Updated
}

fn pause_signal(
    ctx: &mut MethodCtx<'_, Pause, ()>,
    _request: &mut Request,
    _rctx: &mut dyn Any,
    signal: Signal,
) {
    ctx.instance()
        .signals
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(signal);
}

pub(crate) fn pause_module() -> ModuleDescriptor<Pause, ()> {
    ModuleDescriptor::new("pause", pause_bootstrap)
        .with_flags(ModuleFlags::NONE.resumable())
        .with_method(Section::Authorize, pause_call)
        .with_method(Section::Accounting, pause_call)
}

// ---------------------------------------------------------------------------
// serial
// ---------------------------------------------------------------------------

/// Shared observation counters for the `serial` module.
#[derive(Default)]
pub(crate) struct SerialStats {
    inside: AtomicU32,
    pub(crate) overlaps: AtomicU64,
    pub(crate) calls: AtomicU64,
    pub(crate) highest_tally: AtomicU64,
}

/// Instance data of the `serial` module.
pub(crate) struct Serial {
    stats: Arc<SerialStats>,
    // Plain field: only ever touched under the instance lock.
    tally: u64,
}

/// Thread data of the `serial` module: a handle on the shared stats.
#[derive(Default)]
pub(crate) struct SerialThread {
    pub(crate) stats: Arc<SerialStats>,
}

fn serial_bootstrap(_config: &ConfigSection) -> Result<Serial, ModuleError> {
    Ok(Serial {
        stats: Arc::default(),
        tally: 0,
    })
}

fn serial_thread(
    _config: &ConfigSection,
    instance: &Serial,
    _el: &EventLoop,
) -> Result<SerialThread, ModuleError> {
    Ok(SerialThread {
        stats: Arc::clone(&instance.stats),
    })
}

fn serial_call(ctx: &mut MethodCtx<'_, Serial, SerialThread>, _request: &mut Request) -> Rcode {
    let Some(serial) = ctx.instance_mut() else {
        return Rcode::Fail;
    };
    let stats = &serial.stats;
    if stats.inside.fetch_add(1, Ordering::SeqCst) != 0 {
        stats.overlaps.fetch_add(1, Ordering::SeqCst);
    }
    let before = serial.tally;
    thread::sleep(Duration::from_micros(200));
    serial.tally = before + 1;
    stats.highest_tally.fetch_max(serial.tally, Ordering::SeqCst);
    stats.calls.fetch_add(1, Ordering::SeqCst);
    stats.inside.fetch_sub(1, Ordering::SeqCst);
    Rcode::Ok
}

pub(crate) fn serial_module() -> ModuleDescriptor<Serial, SerialThread> {
    ModuleDescriptor::new("serial", serial_bootstrap)
        .with_flags(ModuleFlags::NONE.thread_unsafe())
        .with_thread_instantiate(serial_thread)
        .with_method(Section::Authorize, serial_call)
}

// ---------------------------------------------------------------------------
// rogue and stuck
// ---------------------------------------------------------------------------

fn unit_bootstrap(_config: &ConfigSection) -> Result<(), ModuleError> {
    Ok(())
}

fn rogue_call(ctx: &mut MethodCtx<'_, (), ()>, request: &mut Request) -> Rcode {
    request.control_mut().add("Rogue-Hit", ctx.name());
    Rcode::Yield
}

pub(crate) fn rogue_module() -> ModuleDescriptor<(), ()> {
    ModuleDescriptor::new("rogue", unit_bootstrap).with_method(Section::Authorize, rogue_call)
}

fn stuck_thread(
    config: &ConfigSection,
    _instance: &(),
    _el: &EventLoop,
) -> Result<(), ModuleError> {
    Err(ModuleError::lifecycle(
        config.name(),
        LifecyclePhase::ThreadInstantiate,
        "no thread resources",
    ))
}

pub(crate) fn stuck_module() -> ModuleDescriptor<(), ()> {
    ModuleDescriptor::new("stuck", unit_bootstrap)
        .with_thread_instantiate(stuck_thread)
        .with_method(Section::Authorize, |_ctx, _request| Rcode::Ok)
}

// ---------------------------------------------------------------------------
// Registry helpers
// ---------------------------------------------------------------------------

/// Registers every test module kind.
pub(crate) fn register_test_modules(registry: &mut ModuleRegistry) {
    registry.register_module(counter_module()).expect("register counter");
    registry.register_module(pause_module()).expect("register pause");
    registry.register_module(serial_module()).expect("register serial");
    registry.register_module(rogue_module()).expect("register rogue");
    registry.register_module(stuck_module()).expect("register stuck");
}

/// Instance section named `name` of module kind `kind`.
pub(crate) fn instance(name: &str, kind: &str) -> ConfigSection {
    ConfigSection::new(name).with_pair("module", kind)
}

/// Builds a registry with `instances` bootstrapped and instantiated.
pub(crate) fn ready_registry(instances: impl IntoIterator<Item = ConfigSection>) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    register_test_modules(&mut registry);
    for config in instances {
        let name = config.name().to_owned();
        registry.add_instance(&name, config).expect("add instance");
    }
    let reporter = StructuredLifecycleReporter::new();
    registry.bootstrap(&reporter).expect("bootstrap");
    registry.instantiate(&reporter).expect("instantiate");
    registry
}

/// Module call instruction for a registered instance.
pub(crate) fn call(registry: &ModuleRegistry, name: &str, section: Section) -> Instruction {
    Instruction::Module {
        instance: Arc::clone(registry.find(name).expect("instance registered")),
        section,
    }
}

/// Program from a list of instructions.
pub(crate) fn program(instructions: impl IntoIterator<Item = Instruction>) -> Program {
    instructions.into_iter().collect()
}
