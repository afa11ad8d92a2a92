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
use lattice_runtime::{
    Hook, Hooks, Module, ModuleKey, ModuleRef, Overrides, Runtime, RuntimeConfig, RuntimeError,
};

journaled_module!(Alpha);
journaled_module!(Beta, deps = [Alpha]);
journaled_module!(Gamma, deps = [Alpha]);

journaled_module!(Xeno);
journaled_module!(Yarrow, deps = [Xeno]);

journaled_module!(Ping, deps = [Pong]);
journaled_module!(Pong, deps = [Ping]);

journaled_module!(Needy, deps = [Broken]);

journaled_module!(Late, deps = [Alpha]);

struct Broken;

impl Module for Broken {
    fn create() -> anyhow::Result<Self> {
        anyhow::bail!("device not found")
    }

    fn hooks(_: &mut Hooks<Self>) {}
}

fn position(names: &[&str], name: &str) -> usize {
    names
        .iter()
        .position(|n| *n == name)
        .unwrap_or_else(|| panic!("{name} is not registered"))
}

#[test]
fn test_dependencies_init_first_and_dispose_last() -> Result<()> {
    let runtime = Runtime::new(RuntimeConfig::default())?;
    runtime.register::<Beta>()?;
    runtime.register::<Gamma>()?;
    assert_eq!(runtime.module_names(), vec!["Profiler", "Alpha", "Beta", "Gamma"]);

    take_journal();
    runtime.initialize()?;
    assert_eq!(
        entries_for(&take_journal(), "INIT"),
        vec!["Alpha.INIT", "Beta.INIT", "Gamma.INIT"]
    );

    runtime.dispose();
    assert_eq!(
        entries_for(&take_journal(), "DISPOSE"),
        vec!["Gamma.DISPOSE", "Beta.DISPOSE", "Alpha.DISPOSE"]
    );
    Ok(())
}

#[test]
fn test_module_is_a_lazy_singleton() -> Result<()> {
    let runtime = Runtime::new(RuntimeConfig::default())?;
    take_journal();

    // Registering the dependent first pulls its dependency in ahead of it.
    runtime.register::<Yarrow>()?;
    runtime.register::<Xeno>()?;

    let names = runtime.module_names();
    assert!(position(&names, "Xeno") < position(&names, "Yarrow"));

    let first = runtime.get::<Xeno>()?;
    let second = runtime.get::<Xeno>()?;
    assert!(ModuleRef::ptr_eq(&first, &second));
    assert_eq!(
        take_journal(),
        vec!["Yarrow.create", "Xeno.create"],
        "each module is built exactly once"
    );
    Ok(())
}

#[test]
fn test_circular_dependency_is_broken() -> Result<()> {
    init_logger();
    let runtime = Runtime::new(RuntimeConfig::default())?;

    runtime.register::<Ping>()?;

    assert!(runtime.contains::<Ping>());
    assert!(runtime.contains::<Pong>());
    assert_eq!(runtime.module_names().len(), 3);
    Ok(())
}

#[test]
fn test_unregistered_module_is_not_found() -> Result<()> {
    let runtime = Runtime::new(RuntimeConfig::default())?;
    assert!(matches!(
        runtime.get::<Alpha>(),
        Err(RuntimeError::ModuleNotFound("Alpha"))
    ));
    Ok(())
}

#[test]
fn test_failing_constructor_leaves_registry_untouched() -> Result<()> {
    let runtime = Runtime::new(RuntimeConfig::default())?;

    let err = runtime.register::<Needy>().unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::ModuleConstruction {
            module: "Broken",
            ..
        }
    ));
    assert!(!runtime.contains::<Needy>());
    assert!(!runtime.contains::<Broken>());
    assert_eq!(runtime.module_names(), vec!["Profiler"]);
    Ok(())
}

#[test]
fn test_registration_after_init_runs_init_immediately() -> Result<()> {
    let runtime = Runtime::new(fast_config())?;
    runtime.initialize()?;
    take_journal();

    runtime.register::<Late>()?;

    // Alpha comes in as a dependency and is initialized first.
    assert_eq!(
        entries_for(&take_journal(), "INIT"),
        vec!["Alpha.INIT", "Late.INIT"]
    );

    runtime.tick()?;
    let journal = take_journal();
    assert!(journal.contains(&"Late.UPDATE_PRE".to_owned()));
    Ok(())
}

journaled_module!(Anchor);
journaled_module!(Staged, deps = [Anchor]);

/// Registers `Staged` from its INIT, before `Anchor` has been initialized.
struct Loader;

impl Module for Loader {
    fn create() -> anyhow::Result<Self> {
        Ok(Self)
    }

    fn hooks(hooks: &mut Hooks<Self>) {
        hooks.on(Hook::Init, |_, runtime| {
            common::record("Loader.INIT");
            runtime.register::<Staged>()?;
            Ok(())
        });
    }
}

#[test]
fn test_registration_during_init_initializes_pending_dependencies() -> Result<()> {
    let runtime = Runtime::new(fast_config())?;
    runtime.register::<Loader>()?;
    runtime.register::<Anchor>()?;
    take_journal();

    runtime.initialize()?;

    // Anchor was registered but not yet reached when Staged needed it.
    assert_eq!(
        entries_for(&take_journal(), "INIT"),
        vec!["Loader.INIT", "Anchor.INIT", "Staged.INIT"]
    );
    let names = runtime.module_names();
    assert!(position(&names, "Anchor") < position(&names, "Staged"));
    Ok(())
}

// --- Overrides ---

#[derive(Default)]
struct Counter {
    ticks: u32,
}

impl Module for Counter {
    fn create() -> anyhow::Result<Self> {
        Ok(Self::default())
    }

    fn hooks(hooks: &mut Hooks<Self>) {
        hooks.on(Hook::UpdatePre, |counter, _| {
            counter.ticks += 1;
            Ok(())
        });
    }
}

struct LoudCounter {
    inner: Counter,
    step: u32,
}

impl Module for LoudCounter {
    fn create() -> anyhow::Result<Self> {
        Ok(Self {
            inner: Counter::default(),
            step: 10,
        })
    }

    fn hooks(hooks: &mut Hooks<Self>) {
        hooks
            .on(Hook::Init, |_, _| {
                common::record("LoudCounter.INIT");
                Ok(())
            })
            .on(Hook::UpdatePre, |loud, _| {
                loud.inner.ticks += loud.step;
                Ok(())
            });
    }
}

impl Overrides<Counter> for LoudCounter {
    fn base(&self) -> &Counter {
        &self.inner
    }

    fn base_mut(&mut self) -> &mut Counter {
        &mut self.inner
    }
}

impl Overrides<Counter> for Counter {
    fn base(&self) -> &Counter {
        self
    }

    fn base_mut(&mut self) -> &mut Counter {
        self
    }
}

#[test]
fn test_override_replaces_base_lookups_and_hooks() -> Result<()> {
    let runtime = Runtime::new(fast_config())?;
    runtime.register::<Counter>()?;
    runtime.register_override::<Counter, LoudCounter>(LoudCounter::create()?)?;

    runtime.initialize()?;
    runtime.tick()?;
    runtime.tick()?;

    // Only the override's hook ran, against the state it exposes as Counter.
    assert_eq!(runtime.get::<Counter>()?.borrow().ticks, 20);
    Ok(())
}

#[test]
fn test_first_override_wins() -> Result<()> {
    let runtime = Runtime::new(fast_config())?;
    runtime.register_override::<Counter, LoudCounter>(LoudCounter {
        inner: Counter::default(),
        step: 1,
    })?;
    runtime.register_override::<Counter, LoudCounter>(LoudCounter {
        inner: Counter::default(),
        step: 100,
    })?;

    runtime.initialize()?;
    runtime.tick()?;

    assert_eq!(runtime.get::<Counter>()?.borrow().ticks, 1);
    Ok(())
}

#[test]
fn test_override_after_init_is_initialized_immediately() -> Result<()> {
    let runtime = Runtime::new(fast_config())?;
    runtime.register::<Counter>()?;
    runtime.initialize()?;
    take_journal();

    runtime.register_override::<Counter, LoudCounter>(LoudCounter::create()?)?;

    assert_eq!(take_journal(), vec!["LoudCounter.INIT"]);
    Ok(())
}

#[test]
fn test_self_override_is_rejected() -> Result<()> {
    let runtime = Runtime::new(RuntimeConfig::default())?;
    let err = runtime
        .register_override::<Counter, Counter>(Counter::default())
        .unwrap_err();
    assert!(matches!(err, RuntimeError::SelfOverride("Counter")));
    Ok(())
}

// --- Borrowing ---

struct Introspective;

impl Module for Introspective {
    fn create() -> anyhow::Result<Self> {
        Ok(Self)
    }

    fn dependencies() -> Vec<ModuleKey> {
        vec![ModuleKey::of::<Counter>()]
    }

    fn hooks(hooks: &mut Hooks<Self>) {
        hooks.on(Hook::Init, |_, runtime| {
            let this = runtime.get::<Introspective>()?;
            assert!(matches!(
                this.try_borrow(),
                Err(RuntimeError::ModuleBusy("Introspective"))
            ));
            // Other modules are free to borrow.
            runtime.get::<Counter>()?.try_borrow_mut()?.ticks = 42;
            Ok(())
        });
    }
}

#[test]
fn test_module_is_busy_while_its_hook_runs() -> Result<()> {
    let runtime = Runtime::new(RuntimeConfig::default())?;
    runtime.register::<Introspective>()?;
    runtime.initialize()?;
    assert_eq!(runtime.get::<Counter>()?.borrow().ticks, 42);
    Ok(())
}
