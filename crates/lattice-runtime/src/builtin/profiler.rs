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

//! Collects named values reported by modules, grouped by tab.

use crate::module::{Hook, Hooks, Module};
use std::collections::BTreeMap;
use std::fmt::{Display, Write as _};

/// Latest profiled values, keyed by tab then title.
///
/// The runtime registers this module itself; values reported before it is
/// initialized are dropped.
#[derive(Debug, Default)]
pub struct Profiler {
    initialized: bool,
    tabs: BTreeMap<String, BTreeMap<String, String>>,
}

impl Profiler {
    /// Stores `value` under `tab` / `title`, replacing the previous value.
    pub fn add(&mut self, tab: &str, title: &str, value: impl Display) {
        if !self.initialized {
            return;
        }
        self.tabs
            .entry(tab.to_owned())
            .or_default()
            .insert(title.to_owned(), value.to_string());
    }

    /// The latest value reported under `tab` / `title`.
    pub fn value(&self, tab: &str, title: &str) -> Option<&str> {
        self.tabs.get(tab)?.get(title).map(String::as_str)
    }

    /// Every value of one tab, sorted by title.
    pub fn tab(&self, tab: &str) -> Option<&BTreeMap<String, String>> {
        self.tabs.get(tab)
    }

    /// Tab names, sorted.
    pub fn tab_names(&self) -> impl Iterator<Item = &str> {
        self.tabs.keys().map(String::as_str)
    }

    /// Renders every tab as indented text.
    pub fn summary(&self) -> String {
        let mut text = String::new();
        for (tab, values) in &self.tabs {
            let _ = writeln!(text, "[{tab}]");
            for (title, value) in values {
                let _ = writeln!(text, "  {title}: {value}");
            }
        }
        text
    }
}

impl Module for Profiler {
    fn create() -> anyhow::Result<Self> {
        Ok(Self::default())
    }

    fn hooks(hooks: &mut Hooks<Self>) {
        hooks
            .on(Hook::Init, |profiler, _| {
                profiler.initialized = true;
                Ok(())
            })
            .on(Hook::Dispose, |profiler, _| {
                log::debug!("Profiler final state:\n{}", profiler.summary());
                profiler.initialized = false;
                Ok(())
            });
    }
}
