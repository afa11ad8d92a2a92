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

#[macro_use]
mod common;

use anyhow::Result;
use common::{entries_for, fast_config, init_logger, take_journal};
use lattice_runtime::runtime::RUNTIME_TAB;
use lattice_runtime::{
    Hook, Hooks, Module, Profiler, Runtime, RuntimeConfig, RuntimeError, RuntimeEvent, RuntimePhase,
};
use std::thread;
use std::time::Duration;

journaled_module!(Ground);
journaled_module!(Upper, deps = [Ground]);

#[test]
fn test_tick_runs_phases_in_order() -> Result<()> {
    let runtime = Runtime::new(fast_config())?;
    runtime.register::<Upper>()?;
    runtime.initialize()?;
    take_journal();

    let report = runtime.tick()?;

    assert!(report.logic && report.render && report.profile);
    assert_eq!(
        take_journal(),
        vec![
            "Ground.UPDATE_ALWAYS",
            "Upper.UPDATE_ALWAYS",
            "Ground.UPDATE_PRE",
            "Upper.UPDATE_PRE",
            "Ground.UPDATE_POST",
            "Upper.UPDATE_POST",
            "Ground.RENDER",
            "Upper.RENDER",
            "Ground.PROFILE",
            "Upper.PROFILE",
        ]
    );
    Ok(())
}

#[test]
fn test_logic_step_waits_for_its_interval() -> Result<()> {
    let config = RuntimeConfig {
        logic_rate_hz: 10.0,
        ..fast_config()
    };
    let runtime = Runtime::new(config)?;
    runtime.register::<Ground>()?;
    runtime.initialize()?;
    take_journal();

    let report = runtime.tick()?;
    assert!(!report.logic);
    assert!(report.render, "uncapped render runs on every tick");
    assert_eq!(entries_for(&take_journal(), "UPDATE_PRE"), Vec::<String>::new());

    thread::sleep(Duration::from_millis(120));
    let report = runtime.tick()?;
    assert!(report.logic);
    assert_eq!(entries_for(&take_journal(), "UPDATE_PRE"), vec!["Ground.UPDATE_PRE"]);
    assert!(runtime.delta() >= Duration::from_millis(100));
    Ok(())
}

#[test]
fn test_render_respects_fps_limit() -> Result<()> {
    let config = RuntimeConfig {
        fps_limit: Some(10),
        ..fast_config()
    };
    let runtime = Runtime::new(config)?;
    runtime.initialize()?;

    assert!(!runtime.tick()?.render);
    thread::sleep(Duration::from_millis(120));
    assert!(runtime.tick()?.render);
    assert!(!runtime.tick()?.render);

    // Lifting the cap renders on every tick again.
    runtime.set_fps_limit(None);
    assert!(runtime.tick()?.render);
    assert!(runtime.tick()?.render);
    Ok(())
}

#[test]
fn test_render_skipped_while_logic_drifts() -> Result<()> {
    let config = RuntimeConfig {
        logic_rate_hz: 1000.0,
        drift_tolerance: 1.0,
        ..fast_config()
    };
    let runtime = Runtime::new(config)?;
    runtime.initialize()?;

    // A 30ms stall makes the logic delta ~30x its 1ms interval.
    thread::sleep(Duration::from_millis(30));
    let report = runtime.tick()?;

    assert!(report.logic);
    assert!(!report.render);
    Ok(())
}

#[test]
fn test_events_reconfigure_the_runtime() -> Result<()> {
    let runtime = Runtime::new(fast_config())?;
    let handle = runtime.close_handle();
    runtime.initialize()?;

    handle.send(RuntimeEvent::SetFpsLimit(Some(30)));
    handle.send(RuntimeEvent::SetLogicRate(20.0));
    handle.send(RuntimeEvent::SetProcessorBudget(1.5));
    runtime.tick()?;

    let config = runtime.config();
    assert_eq!(config.fps_limit, Some(30));
    assert_eq!(config.logic_rate_hz, 20.0);
    assert_eq!(config.processor_budget_ms, 1.5);
    Ok(())
}

#[test]
fn test_posted_events_apply_on_the_next_tick() -> Result<()> {
    let runtime = Runtime::new(fast_config())?;
    runtime.initialize()?;

    runtime.post_event(RuntimeEvent::SetFpsLimit(Some(24)));
    runtime.post_event(RuntimeEvent::CloseRequested);
    assert_eq!(runtime.config().fps_limit, None);
    assert!(!runtime.is_close_requested());

    runtime.tick()?;
    assert_eq!(runtime.config().fps_limit, Some(24));
    assert!(runtime.is_close_requested());
    Ok(())
}

#[test]
fn test_profile_pass_reports_module_timings() -> Result<()> {
    let runtime = Runtime::new(fast_config())?;
    runtime.register::<Ground>()?;
    runtime.initialize()?;
    runtime.tick()?;

    let profiler = runtime.get::<Profiler>()?;
    let profiler = profiler.borrow();
    let value = profiler.value(RUNTIME_TAB, "Ground").unwrap();
    assert!(value.ends_with(" ms"), "unexpected timing {value}");
    Ok(())
}

// --- Run loop ---

struct StopAfter {
    remaining: u32,
}

impl Module for StopAfter {
    fn create() -> anyhow::Result<Self> {
        Ok(Self { remaining: 3 })
    }

    fn hooks(hooks: &mut Hooks<Self>) {
        hooks.on(Hook::UpdatePre, |stop, runtime| {
            stop.remaining -= 1;
            if stop.remaining == 0 {
                runtime.request_close();
            }
            Ok(())
        });
    }
}

#[test]
fn test_run_stops_when_close_is_requested() -> Result<()> {
    let runtime = Runtime::new(fast_config())?;
    runtime.register::<StopAfter>()?;
    let stop = runtime.get::<StopAfter>()?;

    runtime.run()?;

    assert_eq!(stop.borrow().remaining, 0);
    assert_eq!(runtime.phase(), RuntimePhase::Terminated);
    Ok(())
}

#[test]
fn test_close_from_another_thread() -> Result<()> {
    let runtime = Runtime::new(RuntimeConfig::default())?;
    let handle = runtime.close_handle();
    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.request_close();
    });

    runtime.run()?;

    closer.join().unwrap();
    assert_eq!(runtime.phase(), RuntimePhase::Terminated);
    Ok(())
}

struct Faulty;

impl Module for Faulty {
    fn create() -> anyhow::Result<Self> {
        Ok(Self)
    }

    fn dependencies() -> Vec<lattice_runtime::ModuleKey> {
        vec![lattice_runtime::ModuleKey::of::<Ground>()]
    }

    fn hooks(hooks: &mut Hooks<Self>) {
        hooks.on(Hook::UpdatePost, |_, _| anyhow::bail!("simulation diverged"));
    }
}

#[test]
fn test_failing_hook_is_fatal() -> Result<()> {
    init_logger();
    let runtime = Runtime::new(fast_config())?;
    runtime.register::<Faulty>()?;
    take_journal();

    let err = runtime.run().unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::Hook {
            module: "Faulty",
            hook: Hook::UpdatePost,
            ..
        }
    ));
    assert_eq!(runtime.phase(), RuntimePhase::Terminated);
    assert_eq!(entries_for(&take_journal(), "DISPOSE"), vec!["Ground.DISPOSE"]);
    Ok(())
}

struct Panicky;

impl Module for Panicky {
    fn create() -> anyhow::Result<Self> {
        Ok(Self)
    }

    fn hooks(hooks: &mut Hooks<Self>) {
        hooks.on(Hook::Render, |_, _| panic!("out of video memory"));
    }
}

#[test]
fn test_panicking_hook_is_fatal() -> Result<()> {
    let runtime = Runtime::new(fast_config())?;
    runtime.register::<Panicky>()?;

    let err = runtime.run().unwrap_err();

    match err {
        RuntimeError::TickPanicked(message) => assert_eq!(message, "out of video memory"),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(runtime.phase(), RuntimePhase::Terminated);
    Ok(())
}

struct RefusesInit;

impl Module for RefusesInit {
    fn create() -> anyhow::Result<Self> {
        Ok(Self)
    }

    fn dependencies() -> Vec<lattice_runtime::ModuleKey> {
        vec![lattice_runtime::ModuleKey::of::<Ground>()]
    }

    fn hooks(hooks: &mut Hooks<Self>) {
        hooks.on(Hook::Init, |_, _| anyhow::bail!("missing license key"));
    }
}

#[test]
fn test_failing_init_disposes_what_was_initialized() -> Result<()> {
    let runtime = Runtime::new(fast_config())?;
    runtime.register::<RefusesInit>()?;
    take_journal();

    assert!(runtime.initialize().is_err());

    let journal = take_journal();
    assert_eq!(entries_for(&journal, "INIT"), vec!["Ground.INIT"]);
    assert_eq!(entries_for(&journal, "DISPOSE"), vec!["Ground.DISPOSE"]);
    assert_eq!(runtime.phase(), RuntimePhase::Terminated);
    Ok(())
}

#[test]
fn test_dropping_a_running_runtime_disposes_it() -> Result<()> {
    let runtime = Runtime::new(fast_config())?;
    runtime.register::<Ground>()?;
    runtime.initialize()?;
    take_journal();

    drop(runtime);

    assert_eq!(take_journal(), vec!["Ground.DISPOSE"]);
    Ok(())
}
