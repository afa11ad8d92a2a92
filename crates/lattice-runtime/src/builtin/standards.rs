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

//! Standards: extensions updated on every logic step.

use crate::extension::{Extension, ExtensionSelection};
use crate::module::{Hook, Hooks, Module};
use crate::runtime::Runtime;

/// A behaviour plugged into the [`Standards`] module.
pub trait Standard: Extension {
    /// Called on every UPDATE_PRE while the standard is selected.
    fn update(&mut self, runtime: &Runtime) -> anyhow::Result<()>;

    /// Called on every PROFILE pass while the standard is selected.
    fn profile(&self, _runtime: &Runtime) {}
}

/// Host module of every [`Standard`]; all active standards run together.
#[derive(Default)]
pub struct Standards {
    selection: ExtensionSelection<dyn Standard>,
}

impl Standards {
    /// Number of standards currently selected.
    pub fn selected_count(&self) -> usize {
        self.selection.selected().len()
    }

    fn update(&mut self, runtime: &Runtime) -> anyhow::Result<()> {
        self.selection.refresh::<Standards>(runtime)?;
        for standard in self.selection.selected() {
            standard.borrow_mut().update(runtime)?;
        }
        Ok(())
    }

    fn profile(&mut self, runtime: &Runtime) -> anyhow::Result<()> {
        for standard in self.selection.selected() {
            standard.borrow().profile(runtime);
        }
        Ok(())
    }
}

impl Module for Standards {
    fn create() -> anyhow::Result<Self> {
        Ok(Self::default())
    }

    fn hooks(hooks: &mut Hooks<Self>) {
        hooks
            .on(Hook::UpdatePre, Self::update)
            .on(Hook::Profile, Self::profile)
            .on(Hook::Dispose, |standards, runtime| {
                standards.selection.dispose_all(runtime);
                Ok(())
            });
    }
}
