// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The phased scheduler.
//!
//! A [`Runtime`] owns the module registry and drives it through
//! `Uninitialized -> Initializing -> Running -> Disposing -> Terminated`.
//! Every tick runs UPDATE_ALWAYS, then the fixed logic step (UPDATE_PRE and
//! UPDATE_POST) when due, then RENDER when due and the logic step is not
//! drifting, then PROFILE when due.
//!
//! The runtime lives on one thread. Other threads talk to it through a
//! [`CloseHandle`].

use crate::builtin::Profiler;
use crate::error::RuntimeError;
use crate::module::{ErasedModule, Hook};
use crate::registry::ModuleRegistry;
use lattice_core::event::EventBus;
use lattice_core::{Delta, RuntimeConfig, Stopwatch, Timer};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

/// Longest the run loop sleeps when a tick had nothing due.
const MAX_IDLE: Duration = Duration::from_millis(1);

/// Profiler tab the scheduler reports module timings under.
pub const RUNTIME_TAB: &str = "Runtime";

/// Lifecycle state of a [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimePhase {
    /// Modules may be registered; nothing has been initialized.
    #[default]
    Uninitialized,
    /// INIT hooks are running.
    Initializing,
    /// Ticks are being processed.
    Running,
    /// DISPOSE hooks are running.
    Disposing,
    /// Every module has been disposed and dropped.
    Terminated,
}

impl RuntimePhase {
    /// Returns `true` if the scheduler may move from `self` to `next`.
    pub fn can_transition_to(self, next: RuntimePhase) -> bool {
        use RuntimePhase::*;
        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Uninitialized, Terminated)
                | (Initializing, Running)
                | (Initializing, Disposing)
                | (Running, Disposing)
                | (Disposing, Terminated)
        )
    }
}

/// A command sent to a runtime from any thread.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// Stop after the current tick.
    CloseRequested,
    /// Change the render cap. See [`Runtime::set_fps_limit`].
    SetFpsLimit(Option<u32>),
    /// Change the logic rate. See [`Runtime::set_logic_rate`].
    SetLogicRate(f64),
    /// Change the context processor budget. See [`Runtime::set_processor_budget`].
    SetProcessorBudget(f64),
}

/// A thread-safe handle for steering a [`Runtime`] from elsewhere.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    sender: flume::Sender<RuntimeEvent>,
}

impl CloseHandle {
    /// Asks the runtime to stop after its current tick.
    pub fn request_close(&self) {
        self.send(RuntimeEvent::CloseRequested);
    }

    /// Queues `event` for the runtime's next tick.
    pub fn send(&self, event: RuntimeEvent) {
        if self.sender.send(event).is_err() {
            log::warn!("Runtime is gone; event dropped.");
        }
    }
}

/// Which timed phases ran during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// UPDATE_PRE and UPDATE_POST ran.
    pub logic: bool,
    /// RENDER ran.
    pub render: bool,
    /// PROFILE ran.
    pub profile: bool,
}

impl TickReport {
    fn is_idle(&self) -> bool {
        !self.logic && !self.render
    }
}

struct Clock {
    started: Instant,
    time_offset: f64,
    logic_timer: Timer,
    render_timer: Timer,
    profile_timer: Timer,
    logic_delta: Delta,
    render_delta: Delta,
}

impl Clock {
    fn new(config: &RuntimeConfig) -> Self {
        Self {
            started: Instant::now(),
            time_offset: 0.0,
            logic_timer: Timer::new(config.logic_interval()),
            render_timer: Timer::new(config.render_interval().unwrap_or(Duration::ZERO)),
            profile_timer: Timer::new(config.profile_interval()),
            logic_delta: Delta::new(),
            render_delta: Delta::new(),
        }
    }
}

/// The application runtime: module registry plus phased scheduler.
///
/// ```ignore
/// let runtime = Runtime::new(RuntimeConfig::default())?;
/// runtime.register::<Processors>()?;
/// runtime.register::<Game>()?;
/// runtime.run()?;
/// ```
pub struct Runtime {
    pub(crate) registry: RefCell<ModuleRegistry>,
    phase: Cell<RuntimePhase>,
    close_requested: Cell<bool>,
    config: RefCell<RuntimeConfig>,
    clock: RefCell<Clock>,
    events: EventBus<RuntimeEvent>,
}

impl Runtime {
    /// Creates a runtime with the built-in [`Profiler`] registered.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        log::info!(
            "Creating runtime: logic {} Hz, fps limit {:?}",
            config.logic_rate_hz,
            config.fps_limit
        );
        let runtime = Self {
            registry: RefCell::new(ModuleRegistry::default()),
            phase: Cell::new(RuntimePhase::Uninitialized),
            close_requested: Cell::new(false),
            clock: RefCell::new(Clock::new(&config)),
            config: RefCell::new(config),
            events: EventBus::new(),
        };
        runtime.register::<Profiler>()?;
        Ok(runtime)
    }

    /// The current lifecycle phase.
    pub fn phase(&self) -> RuntimePhase {
        self.phase.get()
    }

    pub(crate) fn is_past_init(&self) -> bool {
        matches!(
            self.phase.get(),
            RuntimePhase::Initializing | RuntimePhase::Running
        )
    }

    fn transition(&self, to: RuntimePhase) -> Result<(), RuntimeError> {
        let from = self.phase.get();
        if !from.can_transition_to(to) {
            return Err(RuntimeError::InvalidTransition { from, to });
        }
        log::debug!("Runtime phase {from:?} -> {to:?}");
        self.phase.set(to);
        Ok(())
    }

    /// Runs INIT on every registered module, dependencies first.
    ///
    /// On failure the runtime is disposed and the error returned.
    pub fn initialize(&self) -> Result<(), RuntimeError> {
        self.transition(RuntimePhase::Initializing)?;
        let watch = Stopwatch::new();

        let schedule = self.registry.borrow().schedule();
        for module in &schedule {
            let target = module.target();
            if target.is_initialized() {
                continue;
            }
            if let Err(e) = self.init_module(target.as_ref()) {
                return Err(self.abort(e));
            }
        }

        self.reset_clock();
        self.transition(RuntimePhase::Running)?;
        log::info!(
            "Runtime initialized {} modules in {:.3}s",
            schedule.len(),
            watch.elapsed_secs_f64()
        );
        Ok(())
    }

    /// Processes one scheduler tick.
    pub fn tick(&self) -> Result<TickReport, RuntimeError> {
        let phase = self.phase.get();
        if phase != RuntimePhase::Running {
            return Err(RuntimeError::InvalidTransition {
                from: phase,
                to: RuntimePhase::Running,
            });
        }

        self.process_events();
        let mut report = TickReport::default();

        self.run_phase(Hook::UpdateAlways)?;

        if self.logic_due() {
            {
                let mut clock = self.clock.borrow_mut();
                clock.logic_timer.reset_start_time();
                clock.logic_delta.update();
            }
            self.run_phase(Hook::UpdatePre)?;
            self.run_phase(Hook::UpdatePost)?;
            report.logic = true;
        }

        if self.render_due() {
            {
                let mut clock = self.clock.borrow_mut();
                clock.render_timer.reset_start_time();
                clock.render_delta.update();
            }
            self.run_phase(Hook::Render)?;
            report.render = true;
        }

        if self.clock.borrow().profile_timer.is_passed_time() {
            self.clock.borrow_mut().profile_timer.reset_start_time();
            self.run_profile()?;
            report.profile = true;
        }

        Ok(report)
    }

    /// Initializes, ticks until a close is requested, then disposes.
    ///
    /// A tick that fails or panics is fatal: the runtime is disposed and the
    /// error returned, so the caller can exit with a failure status.
    pub fn run(&self) -> Result<(), RuntimeError> {
        self.initialize()?;

        while !self.close_requested.get() {
            let report = match panic::catch_unwind(AssertUnwindSafe(|| self.tick())) {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => return Err(self.abort(e)),
                Err(payload) => {
                    return Err(self.abort(RuntimeError::TickPanicked(panic_message(
                        payload.as_ref(),
                    ))))
                }
            };
            if report.is_idle() && !self.close_requested.get() {
                self.idle();
            }
        }

        self.dispose();
        Ok(())
    }

    /// Runs DISPOSE on every initialized module, dependents first, then drops them.
    ///
    /// Errors raised by DISPOSE hooks are logged and do not stop the teardown.
    pub fn dispose(&self) {
        match self.phase.get() {
            RuntimePhase::Disposing | RuntimePhase::Terminated => return,
            RuntimePhase::Uninitialized => {
                let dropped = self.registry.borrow_mut().clear();
                drop(dropped);
                self.phase.set(RuntimePhase::Terminated);
                return;
            }
            RuntimePhase::Initializing | RuntimePhase::Running => {}
        }

        self.phase.set(RuntimePhase::Disposing);
        log::info!("Disposing runtime.");

        let schedule = self.registry.borrow().schedule();
        for module in schedule.iter().rev() {
            if let Some(replacement) = &module.replacement {
                self.dispose_module(replacement.as_ref());
            }
            self.dispose_module(module.base.as_ref());
        }

        let dropped = self.registry.borrow_mut().clear();
        drop(dropped);
        self.phase.set(RuntimePhase::Terminated);
        log::info!("Runtime terminated.");
    }

    fn dispose_module(&self, slot: &dyn ErasedModule) {
        if !slot.is_initialized() {
            return;
        }
        if let Err(e) = slot.run_hook(Hook::Dispose, self) {
            log::error!("{}", error_chain(&e));
        }
        slot.set_initialized(false);
    }

    fn abort(&self, error: RuntimeError) -> RuntimeError {
        log::error!("Fatal runtime error: {}", error_chain(&error));
        self.dispose();
        error
    }

    fn run_phase(&self, hook: Hook) -> Result<(), RuntimeError> {
        let schedule = self.registry.borrow().schedule();
        for module in &schedule {
            let target = module.target();
            if target.is_initialized() {
                target.run_hook(hook, self)?;
            }
        }
        Ok(())
    }

    fn run_profile(&self) -> Result<(), RuntimeError> {
        self.run_phase(Hook::Profile)?;

        let schedule = self.registry.borrow().schedule();
        for module in &schedule {
            let target = module.target();
            let average = target.take_profile_time();
            self.profile(
                RUNTIME_TAB,
                target.name(),
                format_args!("{:.3} ms", average.as_secs_f64() * 1000.0),
            );
        }
        self.profile(RUNTIME_TAB, "Logic delta", format_args!("{:?}", self.delta()));
        self.profile(RUNTIME_TAB, "Render delta", format_args!("{:?}", self.delta_render()));
        Ok(())
    }

    fn logic_due(&self) -> bool {
        self.clock.borrow().logic_timer.is_passed_time()
    }

    fn render_due(&self) -> bool {
        let tolerance = self.config.borrow().drift_tolerance;
        let clock = self.clock.borrow();
        let interval = clock.logic_timer.interval().as_secs_f64();
        let drift = (clock.logic_delta.delta().as_secs_f64() - interval).abs();
        // A zero interval means logic runs every tick and cannot drift.
        if interval > 0.0 && drift > tolerance * interval {
            return false;
        }
        let uncapped = self.config.borrow().render_interval().is_none();
        uncapped || clock.render_timer.is_passed_time()
    }

    fn idle(&self) {
        let nap = {
            let clock = self.clock.borrow();
            let mut nap = clock.logic_timer.remaining().min(MAX_IDLE);
            if self.config.borrow().render_interval().is_some() {
                nap = nap.min(clock.render_timer.remaining());
            }
            nap
        };
        if !nap.is_zero() {
            thread::sleep(nap);
        }
    }

    fn reset_clock(&self) {
        let mut clock = self.clock.borrow_mut();
        clock.logic_timer.reset_start_time();
        clock.render_timer.reset_start_time();
        clock.profile_timer.reset_start_time();
        clock.logic_delta = Delta::new();
        clock.render_delta = Delta::new();
    }

    fn process_events(&self) {
        for event in self.events.drain() {
            log::debug!("Runtime event: {event:?}");
            match event {
                RuntimeEvent::CloseRequested => self.request_close(),
                RuntimeEvent::SetFpsLimit(limit) => self.set_fps_limit(limit),
                RuntimeEvent::SetLogicRate(rate) => self.set_logic_rate(rate),
                RuntimeEvent::SetProcessorBudget(budget) => self.set_processor_budget(budget),
            }
        }
    }

    /// Stops the run loop after the current tick.
    pub fn request_close(&self) {
        if !self.close_requested.replace(true) {
            log::info!("Runtime close requested.");
        }
    }

    /// Returns `true` once a close has been requested.
    pub fn is_close_requested(&self) -> bool {
        self.close_requested.get()
    }

    /// Queues `event` for the start of the next tick.
    pub fn post_event(&self, event: RuntimeEvent) {
        self.events.publish(event);
    }

    /// A handle other threads can use to steer this runtime.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            sender: self.events.sender(),
        }
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> RuntimeConfig {
        self.config.borrow().clone()
    }

    /// Changes the render cap. `None`, zero, or anything above
    /// [`lattice_core::config::MAX_CAPPED_FPS`] renders on every tick.
    pub fn set_fps_limit(&self, fps_limit: Option<u32>) {
        let interval = {
            let mut config = self.config.borrow_mut();
            config.fps_limit = fps_limit;
            config.render_interval()
        };
        self.clock
            .borrow_mut()
            .render_timer
            .set_interval(interval.unwrap_or(Duration::ZERO));
    }

    /// Changes the frequency of the fixed logic step.
    pub fn set_logic_rate(&self, rate_hz: f64) {
        let interval = {
            let mut config = self.config.borrow_mut();
            config.logic_rate_hz = rate_hz;
            config.logic_interval()
        };
        self.clock.borrow_mut().logic_timer.set_interval(interval);
    }

    /// Changes the per-tick budget of the context-thread processor.
    pub fn set_processor_budget(&self, budget_ms: f64) {
        self.config.borrow_mut().processor_budget_ms = budget_ms;
    }

    /// Time between the two most recent logic steps.
    pub fn delta(&self) -> Duration {
        self.clock.borrow().logic_delta.delta()
    }

    /// Time between the two most recent render steps.
    pub fn delta_render(&self) -> Duration {
        self.clock.borrow().render_delta.delta()
    }

    /// Seconds since the runtime was created, plus the time offset.
    pub fn time_secs(&self) -> f64 {
        let clock = self.clock.borrow();
        clock.started.elapsed().as_secs_f64() + clock.time_offset
    }

    /// Shifts [`time_secs`](Runtime::time_secs) by `offset` seconds.
    pub fn set_time_offset(&self, offset: f64) {
        self.clock.borrow_mut().time_offset = offset;
    }

    /// Reports a value to the [`Profiler`]. Does nothing while the profiler
    /// is uninitialized or busy.
    pub fn profile(&self, tab: &str, title: &str, value: impl Display) {
        let Ok(profiler) = self.get::<Profiler>() else {
            return;
        };
        if let Ok(mut profiler) = profiler.try_borrow_mut() {
            profiler.add(tab, title, value);
        };
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Formats an error followed by its sources.
pub(crate) fn error_chain(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
