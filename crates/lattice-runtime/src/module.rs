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

//! Module definitions: lifecycle hook tags, the per-module hook table and the
//! type-erased slot the registry stores.
//!
//! A module is a long-lived singleton identified by its Rust type. It
//! declares its dependencies as [`ModuleKey`]s and registers its hooks
//! explicitly in [`Module::hooks`]; no reflection is involved.

use crate::error::RuntimeError;
use crate::runtime::Runtime;
use lattice_core::ProfileTimer;
use std::any::{type_name, Any, TypeId};
use std::cell::{BorrowError, BorrowMutError, Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;
use std::time::Duration;

/// Lifecycle tag a hook is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Runs once, dependencies first.
    Init,
    /// Runs on every scheduler tick.
    UpdateAlways,
    /// Runs on every fixed logic step, before [`Hook::UpdatePost`].
    UpdatePre,
    /// Runs on every fixed logic step, after [`Hook::UpdatePre`].
    UpdatePost,
    /// Runs on every render step.
    Render,
    /// Runs on every profiling pass.
    Profile,
    /// Runs once at teardown, dependents first.
    Dispose,
}

impl Hook {
    /// The scheduler phases, in the order they run within a tick.
    pub const PHASES: [Hook; 4] = [Hook::UpdateAlways, Hook::UpdatePre, Hook::UpdatePost, Hook::Render];

    fn is_timed(self) -> bool {
        Self::PHASES.contains(&self)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::Init => "INIT",
            Hook::UpdateAlways => "UPDATE_ALWAYS",
            Hook::UpdatePre => "UPDATE_PRE",
            Hook::UpdatePost => "UPDATE_POST",
            Hook::Render => "RENDER",
            Hook::Profile => "PROFILE",
            Hook::Dispose => "DISPOSE",
        };
        f.write_str(name)
    }
}

type HookFn<M> = Box<dyn Fn(&mut M, &Runtime) -> anyhow::Result<()>>;

/// The ordered handler table of one module.
pub struct Hooks<M> {
    entries: Vec<(Hook, HookFn<M>)>,
}

impl<M> Hooks<M> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registers `handler` under `hook`. Handlers sharing a tag run in
    /// registration order.
    pub fn on<F>(&mut self, hook: Hook, handler: F) -> &mut Self
    where
        F: Fn(&mut M, &Runtime) -> anyhow::Result<()> + 'static,
    {
        self.entries.push((hook, Box::new(handler)));
        self
    }

    /// Returns `true` if at least one handler is registered under `hook`.
    pub fn handles(&self, hook: Hook) -> bool {
        self.entries.iter().any(|(tag, _)| *tag == hook)
    }

    /// The scheduler phases this table participates in.
    pub fn phases(&self) -> Vec<Hook> {
        Hook::PHASES
            .into_iter()
            .filter(|phase| self.handles(*phase))
            .collect()
    }

    pub(crate) fn run(&self, hook: Hook, module: &mut M, runtime: &Runtime) -> anyhow::Result<()> {
        for (_, handler) in self.entries.iter().filter(|(tag, _)| *tag == hook) {
            handler(&mut *module, runtime)?;
        }
        Ok(())
    }
}

/// A long-lived singleton subsystem.
///
/// ```ignore
/// struct Physics { steps: u64 }
///
/// impl Module for Physics {
///     fn create() -> anyhow::Result<Self> {
///         Ok(Self { steps: 0 })
///     }
///
///     fn dependencies() -> Vec<ModuleKey> {
///         vec![ModuleKey::of::<Tasks>()]
///     }
///
///     fn hooks(hooks: &mut Hooks<Self>) {
///         hooks.on(Hook::UpdatePre, |physics, _| {
///             physics.steps += 1;
///             Ok(())
///         });
///     }
/// }
/// ```
pub trait Module: Sized + 'static {
    /// Builds the singleton. Called at most once per runtime, on first registration.
    fn create() -> anyhow::Result<Self>;

    /// Modules that must be registered (and initialized) before this one.
    fn dependencies() -> Vec<ModuleKey> {
        Vec::new()
    }

    /// Registers this module's lifecycle hooks.
    fn hooks(hooks: &mut Hooks<Self>);

    /// Human-readable name used in logs and profiling.
    fn name() -> &'static str {
        short_type_name::<Self>()
    }
}

/// A module that stands in for the base module `B`.
///
/// Once registered as an override, every lookup of `B` resolves to the
/// `B` embedded in the override, and the override's hooks run in `B`'s
/// position of the scheduling order.
pub trait Overrides<B: Module>: Module {
    /// The base module state exposed to callers asking for `B`.
    fn base(&self) -> &B;

    /// Mutable access to the embedded base module state.
    fn base_mut(&mut self) -> &mut B;
}

pub(crate) struct BuiltModule {
    pub(crate) slot: Rc<dyn ErasedModule>,
    /// An `Rc<dyn Project<M>>` for the module type `M`.
    pub(crate) projection: Box<dyn Any>,
}

/// Type identity of a module, plus the means to build it lazily.
#[derive(Clone, Copy)]
pub struct ModuleKey {
    id: TypeId,
    name: &'static str,
    build: fn() -> Result<BuiltModule, RuntimeError>,
}

impl ModuleKey {
    /// The key of module type `M`.
    pub fn of<M: Module>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: M::name(),
            build: build_module::<M>,
        }
    }

    /// The module's type identity.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The module's name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn build(&self) -> Result<BuiltModule, RuntimeError> {
        (self.build)()
    }
}

impl PartialEq for ModuleKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ModuleKey {}

impl Hash for ModuleKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModuleKey").field(&self.name).finish()
    }
}

fn build_module<M: Module>() -> Result<BuiltModule, RuntimeError> {
    let module = M::create().map_err(|source| RuntimeError::ModuleConstruction {
        module: M::name(),
        source,
    })?;
    let slot = Rc::new(ModuleSlot::new(module));
    let projection: Rc<dyn Project<M>> = slot.clone();
    Ok(BuiltModule {
        slot,
        projection: Box::new(projection),
    })
}

pub(crate) fn build_override<B: Module, O: Overrides<B>>(instance: O) -> BuiltModule {
    let slot = Rc::new(ModuleSlot::new(instance));
    let projection: Rc<dyn Project<B>> = Rc::new(Overriding {
        slot: Rc::clone(&slot),
        _base: PhantomData,
    });
    BuiltModule {
        slot,
        projection: Box::new(projection),
    }
}

/// Registry-side view of a module of any type.
pub(crate) trait ErasedModule {
    fn name(&self) -> &'static str;
    fn dependencies(&self) -> &[ModuleKey];
    fn phases(&self) -> Vec<Hook>;
    fn is_initialized(&self) -> bool;
    fn set_initialized(&self, initialized: bool);
    /// `true` while the module is borrowed, e.g. while one of its hooks runs.
    fn is_busy(&self) -> bool;
    fn run_hook(&self, hook: Hook, runtime: &Runtime) -> Result<(), RuntimeError>;
    /// Average duration of the timed hooks since the previous call.
    fn take_profile_time(&self) -> Duration;
}

pub(crate) struct ModuleSlot<M> {
    module: RefCell<M>,
    hooks: Hooks<M>,
    dependencies: Vec<ModuleKey>,
    initialized: Cell<bool>,
    profile_timer: RefCell<ProfileTimer>,
}

impl<M: Module> ModuleSlot<M> {
    fn new(module: M) -> Self {
        let mut hooks = Hooks::new();
        M::hooks(&mut hooks);
        Self {
            module: RefCell::new(module),
            hooks,
            dependencies: M::dependencies(),
            initialized: Cell::new(false),
            profile_timer: RefCell::new(ProfileTimer::new()),
        }
    }
}

impl<M: Module> ErasedModule for ModuleSlot<M> {
    fn name(&self) -> &'static str {
        M::name()
    }

    fn dependencies(&self) -> &[ModuleKey] {
        &self.dependencies
    }

    fn phases(&self) -> Vec<Hook> {
        self.hooks.phases()
    }

    fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    fn set_initialized(&self, initialized: bool) {
        self.initialized.set(initialized);
    }

    fn is_busy(&self) -> bool {
        self.module.try_borrow_mut().is_err()
    }

    fn run_hook(&self, hook: Hook, runtime: &Runtime) -> Result<(), RuntimeError> {
        if !self.hooks.handles(hook) {
            return Ok(());
        }

        let mut module = self
            .module
            .try_borrow_mut()
            .map_err(|_| RuntimeError::ModuleBusy(M::name()))?;

        if hook.is_timed() {
            self.profile_timer.borrow_mut().start_invocation();
        }
        let result = self.hooks.run(hook, &mut module, runtime);
        if hook.is_timed() {
            self.profile_timer.borrow_mut().stop_invocation();
        }

        result.map_err(|source| RuntimeError::Hook {
            module: M::name(),
            hook,
            source,
        })
    }

    fn take_profile_time(&self) -> Duration {
        let mut timer = self.profile_timer.borrow_mut();
        timer.reset();
        timer.final_time()
    }
}

/// Borrows a module as `M`, either directly or through an override.
pub(crate) trait Project<M> {
    fn try_project(&self) -> Result<Ref<'_, M>, BorrowError>;
    fn try_project_mut(&self) -> Result<RefMut<'_, M>, BorrowMutError>;
    fn identity(&self) -> *const ();
}

impl<M: Module> Project<M> for ModuleSlot<M> {
    fn try_project(&self) -> Result<Ref<'_, M>, BorrowError> {
        self.module.try_borrow()
    }

    fn try_project_mut(&self) -> Result<RefMut<'_, M>, BorrowMutError> {
        self.module.try_borrow_mut()
    }

    fn identity(&self) -> *const () {
        self as *const Self as *const ()
    }
}

struct Overriding<O, B> {
    slot: Rc<ModuleSlot<O>>,
    _base: PhantomData<fn() -> B>,
}

impl<B: Module, O: Overrides<B>> Project<B> for Overriding<O, B> {
    fn try_project(&self) -> Result<Ref<'_, B>, BorrowError> {
        Ok(Ref::map(self.slot.module.try_borrow()?, |o| o.base()))
    }

    fn try_project_mut(&self) -> Result<RefMut<'_, B>, BorrowMutError> {
        Ok(RefMut::map(self.slot.module.try_borrow_mut()?, |o| o.base_mut()))
    }

    fn identity(&self) -> *const () {
        Rc::as_ptr(&self.slot) as *const ()
    }
}

/// A shared handle to a registered module (or to the override standing in for it).
///
/// Borrowing follows [`RefCell`] rules: a module cannot be borrowed while
/// one of its own hooks is running.
pub struct ModuleRef<M> {
    inner: Rc<dyn Project<M>>,
}

impl<M> Clone for ModuleRef<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<M: Module> ModuleRef<M> {
    pub(crate) fn new(inner: Rc<dyn Project<M>>) -> Self {
        Self { inner }
    }

    /// Immutably borrows the module.
    ///
    /// # Panics
    ///
    /// Panics if the module is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, M> {
        match self.inner.try_project() {
            Ok(module) => module,
            Err(_) => panic!("module `{}` is already mutably borrowed", M::name()),
        }
    }

    /// Mutably borrows the module.
    ///
    /// # Panics
    ///
    /// Panics if the module is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, M> {
        match self.inner.try_project_mut() {
            Ok(module) => module,
            Err(_) => panic!("module `{}` is already borrowed", M::name()),
        }
    }

    /// Immutably borrows the module, failing with [`RuntimeError::ModuleBusy`].
    pub fn try_borrow(&self) -> Result<Ref<'_, M>, RuntimeError> {
        self.inner
            .try_project()
            .map_err(|_| RuntimeError::ModuleBusy(M::name()))
    }

    /// Mutably borrows the module, failing with [`RuntimeError::ModuleBusy`].
    pub fn try_borrow_mut(&self) -> Result<RefMut<'_, M>, RuntimeError> {
        self.inner
            .try_project_mut()
            .map_err(|_| RuntimeError::ModuleBusy(M::name()))
    }

    /// Returns `true` if both handles point at the same module instance.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        std::ptr::eq(a.inner.identity(), b.inner.identity())
    }
}

impl<M: Module> fmt::Debug for ModuleRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModuleRef").field(&M::name()).finish()
    }
}

/// Strips the module path (and generic arguments) from a type name.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
