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

//! Helpers shared by the integration tests.

#![allow(dead_code)]

use lattice_runtime::RuntimeConfig;
use std::cell::RefCell;

thread_local! {
    static JOURNAL: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Appends an entry to this thread's journal.
pub fn record(entry: impl Into<String>) {
    JOURNAL.with(|journal| journal.borrow_mut().push(entry.into()));
}

/// Takes every entry recorded on this thread so far.
pub fn take_journal() -> Vec<String> {
    JOURNAL.with(|journal| std::mem::take(&mut *journal.borrow_mut()))
}

/// Journal entries ending with `.{tag}`, in order.
pub fn entries_for(journal: &[String], tag: &str) -> Vec<String> {
    let suffix = format!(".{tag}");
    journal
        .iter()
        .filter(|entry| entry.ends_with(&suffix))
        .cloned()
        .collect()
}

/// Every phase runs on every tick.
pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        fps_limit: None,
        logic_rate_hz: 0.0,
        processor_budget_ms: 8.0,
        profile_interval_secs: 0.0,
        drift_tolerance: 10.0,
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Declares a unit module that journals `Name.create` and `Name.HOOK` for
/// every lifecycle hook.
#[allow(unused_macros)]
macro_rules! journaled_module {
    ($name:ident $(, deps = [$($dep:ty),*])?) => {
        struct $name;

        impl lattice_runtime::Module for $name {
            fn create() -> anyhow::Result<Self> {
                crate::common::record(concat!(stringify!($name), ".create"));
                Ok($name)
            }

            fn dependencies() -> Vec<lattice_runtime::ModuleKey> {
                vec![$($(lattice_runtime::ModuleKey::of::<$dep>()),*)?]
            }

            fn hooks(hooks: &mut lattice_runtime::Hooks<Self>) {
                use lattice_runtime::Hook;
                for hook in [
                    Hook::Init,
                    Hook::UpdateAlways,
                    Hook::UpdatePre,
                    Hook::UpdatePost,
                    Hook::Render,
                    Hook::Profile,
                    Hook::Dispose,
                ] {
                    hooks.on(hook, move |_, _| {
                        crate::common::record(format!("{}.{}", stringify!($name), hook));
                        Ok(())
                    });
                }
            }
        }
    };
}
