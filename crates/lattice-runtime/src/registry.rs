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

//! Storage behind the module registry and the registration algorithm.

use crate::error::RuntimeError;
use crate::extension::ExtensionSet;
use crate::module::{build_override, BuiltModule, ErasedModule, Hook, Module, ModuleKey, ModuleRef, Overrides, Project};
use crate::runtime::Runtime;
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

struct ModuleEntry {
    key: ModuleKey,
    slot: Rc<dyn ErasedModule>,
    projection: Box<dyn Any>,
}

struct OverrideEntry {
    base: TypeId,
    slot: Rc<dyn ErasedModule>,
    projection: Box<dyn Any>,
}

/// A module in scheduling position, with the override (if any) that runs in its place.
#[derive(Clone)]
pub(crate) struct ScheduledModule {
    pub(crate) base: Rc<dyn ErasedModule>,
    pub(crate) replacement: Option<Rc<dyn ErasedModule>>,
}

impl ScheduledModule {
    /// The module whose hooks run at this position.
    pub(crate) fn target(&self) -> &Rc<dyn ErasedModule> {
        self.replacement.as_ref().unwrap_or(&self.base)
    }
}

/// Active modules in dependency order, overrides, and per-module extension sets.
#[derive(Default)]
pub(crate) struct ModuleRegistry {
    active: Vec<ModuleEntry>,
    overrides: Vec<OverrideEntry>,
    /// Modules whose dependencies are being resolved right now.
    resolving: HashSet<TypeId>,
    pub(crate) extensions: HashMap<TypeId, ExtensionSet>,
    pub(crate) next_extension_id: u64,
}

impl ModuleRegistry {
    fn position(&self, id: TypeId) -> Option<usize> {
        self.active.iter().position(|entry| entry.key.id() == id)
    }

    pub(crate) fn contains(&self, id: TypeId) -> bool {
        self.position(id).is_some()
    }

    fn find_override(&self, base: TypeId) -> Option<&OverrideEntry> {
        self.overrides.iter().find(|entry| entry.base == base)
    }

    /// The module whose hooks run in `id`'s position: its override if any.
    fn target(&self, id: TypeId) -> Option<Rc<dyn ErasedModule>> {
        let base = self.position(id).map(|index| &self.active[index].slot);
        self.find_override(id)
            .map(|entry| &entry.slot)
            .or(base)
            .map(Rc::clone)
    }

    /// Snapshot of the scheduling order, so hooks can run without holding a borrow.
    pub(crate) fn schedule(&self) -> Vec<ScheduledModule> {
        self.active
            .iter()
            .map(|entry| ScheduledModule {
                base: Rc::clone(&entry.slot),
                replacement: self.find_override(entry.key.id()).map(|o| Rc::clone(&o.slot)),
            })
            .collect()
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.active.iter().map(|entry| entry.key.name()).collect()
    }

    /// Drops every module, override and extension.
    pub(crate) fn clear(&mut self) -> Vec<Rc<dyn ErasedModule>> {
        self.extensions.clear();
        self.resolving.clear();
        let overrides = self.overrides.drain(..).map(|entry| entry.slot);
        let active = self.active.drain(..).map(|entry| entry.slot);
        overrides.chain(active).collect()
    }
}

fn describe(slot: &dyn ErasedModule, post_init: bool) -> String {
    let mut phases: Vec<String> = slot.phases().iter().map(Hook::to_string).collect();
    if post_init {
        phases.insert(0, "POST_INIT".to_owned());
    }
    let requires: Vec<&str> = slot.dependencies().iter().map(ModuleKey::name).collect();
    format!(
        "{} ({}) Requires({})",
        slot.name(),
        phases.join(", "),
        requires.join(", ")
    )
}

impl Runtime {
    /// Registers module `M` and, transitively, its dependencies.
    ///
    /// Registration is idempotent. Dependencies end up ahead of their
    /// dependents in the scheduling order. Once the runtime is initializing
    /// or running, a newly added module is initialized before this returns.
    pub fn register<M: Module>(&self) -> Result<(), RuntimeError> {
        self.register_key(ModuleKey::of::<M>())
    }

    /// Registers every module in `keys`, in order.
    pub fn register_all(&self, keys: &[ModuleKey]) -> Result<(), RuntimeError> {
        keys.iter().try_for_each(|key| self.register_key(*key))
    }

    pub(crate) fn register_key(&self, key: ModuleKey) -> Result<(), RuntimeError> {
        {
            let registry = self.registry.borrow();
            if registry.contains(key.id()) {
                if registry.resolving.contains(&key.id()) {
                    log::warn!(
                        "Circular dependency on module `{}`; treating the edge as satisfied.",
                        key.name()
                    );
                    return Ok(());
                }
                let target = registry.target(key.id());
                drop(registry);
                // Registered earlier but not reached by INIT yet.
                if let Some(target) = target.filter(|_| self.is_past_init()) {
                    self.ensure_initialized(key.id(), target.as_ref())?;
                }
                return Ok(());
            }
        }

        let BuiltModule { slot, projection } = key.build()?;
        let dependencies = slot.dependencies().to_vec();
        {
            let mut registry = self.registry.borrow_mut();
            registry.active.push(ModuleEntry {
                key,
                slot: Rc::clone(&slot),
                projection,
            });
            registry.resolving.insert(key.id());
        }

        let resolved = dependencies
            .into_iter()
            .try_for_each(|dependency| self.register_key(dependency));

        {
            let mut registry = self.registry.borrow_mut();
            registry.resolving.remove(&key.id());
            let index = registry.position(key.id());
            match (resolved, index) {
                (Ok(()), Some(index)) => {
                    // Dependencies were appended meanwhile; move behind them.
                    let entry = registry.active.remove(index);
                    registry.active.push(entry);
                }
                (Err(e), Some(index)) => {
                    registry.active.remove(index);
                    return Err(e);
                }
                (Err(e), None) => return Err(e),
                (Ok(()), None) => {}
            }
        }

        let post_init = self.is_past_init();
        log::info!("Registering {}", describe(slot.as_ref(), post_init));

        if post_init {
            self.ensure_initialized(key.id(), slot.as_ref())?;
        }
        Ok(())
    }

    /// Registers `instance` as the stand-in for base module `B`.
    ///
    /// The base module is registered if needed, but the override's own
    /// dependencies are not resolved. The first override registered for a
    /// base wins. Registered after initialization, the override is
    /// initialized immediately.
    pub fn register_override<B: Module, O: Overrides<B>>(&self, instance: O) -> Result<(), RuntimeError> {
        if TypeId::of::<B>() == TypeId::of::<O>() {
            return Err(RuntimeError::SelfOverride(O::name()));
        }
        self.register::<B>()?;

        let BuiltModule { slot, projection } = build_override::<B, O>(instance);
        let effective = {
            let mut registry = self.registry.borrow_mut();
            let effective = registry.find_override(TypeId::of::<B>()).is_none();
            if !effective {
                log::warn!(
                    "Module `{}` is already overridden; `{}` will not be used.",
                    B::name(),
                    O::name()
                );
            }
            registry.overrides.push(OverrideEntry {
                base: TypeId::of::<B>(),
                slot: Rc::clone(&slot),
                projection,
            });
            effective
        };
        log::info!("Overriding {} with {}", B::name(), O::name());

        if effective && self.is_past_init() {
            self.ensure_initialized(TypeId::of::<O>(), slot.as_ref())?;
        }
        Ok(())
    }

    /// Returns the active override for `M` if one exists, else the module itself.
    pub fn get<M: Module>(&self) -> Result<ModuleRef<M>, RuntimeError> {
        let id = TypeId::of::<M>();
        let registry = self.registry.borrow();
        let projection = registry
            .find_override(id)
            .map(|entry| &entry.projection)
            .or_else(|| {
                registry
                    .position(id)
                    .map(|index| &registry.active[index].projection)
            })
            .and_then(|projection| projection.downcast_ref::<Rc<dyn Project<M>>>())
            .ok_or(RuntimeError::ModuleNotFound(M::name()))?;
        Ok(ModuleRef::new(Rc::clone(projection)))
    }

    /// Returns `true` if module `M` is registered.
    pub fn contains<M: Module>(&self) -> bool {
        self.registry.borrow().contains(TypeId::of::<M>())
    }

    /// Names of the registered modules, in scheduling order.
    pub fn module_names(&self) -> Vec<&'static str> {
        self.registry.borrow().names()
    }

    /// Initializes `slot` after every registered dependency it still waits on,
    /// deepest first. Modules whose INIT is running are left alone.
    fn ensure_initialized(&self, id: TypeId, slot: &dyn ErasedModule) -> Result<(), RuntimeError> {
        let mut visiting = HashSet::from([id]);
        self.init_with_dependencies(slot, &mut visiting)
    }

    fn init_with_dependencies(
        &self,
        slot: &dyn ErasedModule,
        visiting: &mut HashSet<TypeId>,
    ) -> Result<(), RuntimeError> {
        if slot.is_initialized() || slot.is_busy() {
            return Ok(());
        }
        for dependency in slot.dependencies() {
            if !visiting.insert(dependency.id()) {
                continue;
            }
            let target = self.registry.borrow().target(dependency.id());
            if let Some(target) = target {
                self.init_with_dependencies(target.as_ref(), visiting)?;
            }
        }
        // An override depending on its base reaches itself through the base.
        if slot.is_initialized() {
            return Ok(());
        }
        self.init_module(slot)
    }

    pub(crate) fn init_module(&self, slot: &dyn ErasedModule) -> Result<(), RuntimeError> {
        slot.run_hook(Hook::Init, self)?;
        slot.set_initialized(true);
        Ok(())
    }
}
