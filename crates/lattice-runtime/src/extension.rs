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

//! Extensions: pluggable implementations attached to a host module.
//!
//! A host module owns an [`ExtensionSet`] versioned by a counter. Consumers
//! keep an [`ExtensionWatch`] and only rescan when the version moved, so an
//! unchanged set costs a single comparison per query.
//!
//! Capabilities are expressed as traits extending [`Extension`]; an
//! extension is registered as `Rc<RefCell<dyn Capability>>` and matched by
//! that capability.

use crate::error::RuntimeError;
use crate::module::{short_type_name, Module, ModuleKey};
use crate::runtime::Runtime;
use std::any::{Any, TypeId};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// A pluggable implementation of some capability, owned by a host module.
pub trait Extension: 'static {
    /// Human-readable name used in logs.
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }

    /// Modules that must be registered before this extension is attached.
    fn dependencies(&self) -> Vec<ModuleKey> {
        Vec::new()
    }

    /// Whether the extension may currently be selected.
    fn is_active(&self) -> bool;

    /// Called when the extension becomes selected.
    fn init(&mut self, _runtime: &Runtime) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the extension stops being selected, or at teardown.
    fn dispose(&mut self, _runtime: &Runtime) {}
}

/// Identity of a registered extension, unique within a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionId(u64);

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ext#{}", self.0)
    }
}

/// A shared handle to a registered extension of capability `C`.
pub struct ExtensionHandle<C: ?Sized> {
    id: ExtensionId,
    extension: Rc<RefCell<C>>,
    initialized: Rc<Cell<bool>>,
}

impl<C: ?Sized> Clone for ExtensionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            extension: Rc::clone(&self.extension),
            initialized: Rc::clone(&self.initialized),
        }
    }
}

impl<C: ?Sized + Extension> ExtensionHandle<C> {
    /// The extension's identity.
    pub fn id(&self) -> ExtensionId {
        self.id
    }

    /// Immutably borrows the extension.
    pub fn borrow(&self) -> Ref<'_, C> {
        self.extension.borrow()
    }

    /// Mutably borrows the extension.
    pub fn borrow_mut(&self) -> RefMut<'_, C> {
        self.extension.borrow_mut()
    }

    /// Evaluates [`Extension::is_active`]. An extension that is borrowed
    /// right now, typically because it is the one asking, is not a candidate.
    fn is_selectable(&self) -> bool {
        match self.extension.try_borrow() {
            Ok(extension) => extension.is_active(),
            Err(_) => {
                log::trace!("Extension {} is busy; skipped.", self.id);
                false
            }
        }
    }

    /// Whether [`Extension::init`] ran and [`Extension::dispose`] has not since.
    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    /// Initializes the extension unless it already is.
    pub fn init(&self, runtime: &Runtime) -> Result<(), RuntimeError> {
        if self.initialized.get() {
            return Ok(());
        }
        let mut extension = self.extension.borrow_mut();
        extension
            .init(runtime)
            .map_err(|source| RuntimeError::ExtensionInit {
                extension: extension.name().to_owned(),
                source,
            })?;
        self.initialized.set(true);
        Ok(())
    }

    /// Disposes the extension if it is initialized.
    pub fn dispose(&self, runtime: &Runtime) {
        if !self.initialized.get() {
            return;
        }
        self.extension.borrow_mut().dispose(runtime);
        self.initialized.set(false);
    }
}

impl<C: ?Sized + Extension> fmt::Debug for ExtensionHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionHandle")
            .field("id", &self.id)
            .field("initialized", &self.initialized.get())
            .finish()
    }
}

struct ExtensionEntry {
    capability: TypeId,
    identity: *const (),
    /// An `ExtensionHandle<C>` for the capability `C`.
    handle: Box<dyn Any>,
}

/// The extensions attached to one host module.
#[derive(Default)]
pub(crate) struct ExtensionSet {
    entries: Vec<ExtensionEntry>,
    version: u64,
}

impl ExtensionSet {
    fn handles<C: ?Sized + Extension>(&self) -> Vec<ExtensionHandle<C>> {
        self.entries
            .iter()
            .filter(|entry| entry.capability == TypeId::of::<C>())
            .filter_map(|entry| entry.handle.downcast_ref::<ExtensionHandle<C>>().cloned())
            .collect()
    }
}

/// A consumer's record of the last extension-set version it scanned.
#[derive(Debug, Clone, Default)]
pub struct ExtensionWatch {
    seen: Option<u64>,
}

impl ExtensionWatch {
    /// A watch that has seen nothing, so the first query always scans.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the last scan.
    pub fn reset(&mut self) {
        self.seen = None;
    }
}

impl Runtime {
    /// Attaches `extension` to host module `H` under capability `C`.
    ///
    /// The host and the extension's dependencies are registered first.
    /// Attaching the same instance twice under the same capability returns
    /// the existing handle.
    ///
    /// ```ignore
    /// let handle = runtime.register_extension::<Standards, dyn Standard>(
    ///     Rc::new(RefCell::new(Countdown::new(3))),
    /// )?;
    /// ```
    pub fn register_extension<H: Module, C: ?Sized + Extension>(
        &self,
        extension: Rc<RefCell<C>>,
    ) -> Result<ExtensionHandle<C>, RuntimeError> {
        self.register::<H>()?;
        let dependencies = extension.borrow().dependencies();
        self.register_all(&dependencies)?;

        let identity = Rc::as_ptr(&extension) as *const ();
        let mut registry = self.registry.borrow_mut();
        let id = ExtensionId(registry.next_extension_id);
        let set = registry.extensions.entry(TypeId::of::<H>()).or_default();

        if let Some(existing) = set
            .entries
            .iter()
            .find(|entry| entry.capability == TypeId::of::<C>() && entry.identity == identity)
            .and_then(|entry| entry.handle.downcast_ref::<ExtensionHandle<C>>())
        {
            return Ok(existing.clone());
        }

        let handle = ExtensionHandle {
            id,
            extension,
            initialized: Rc::new(Cell::new(false)),
        };
        set.entries.push(ExtensionEntry {
            capability: TypeId::of::<C>(),
            identity,
            handle: Box::new(handle.clone()),
        });
        set.version += 1;
        registry.next_extension_id += 1;

        log::info!(
            "Registered extension {} `{}` on {}",
            id,
            handle.borrow().name(),
            H::name()
        );
        Ok(handle)
    }

    /// Forces every watcher of `H`'s extensions to rescan on its next query.
    pub fn mark_extensions_changed<H: Module>(&self) {
        let mut registry = self.registry.borrow_mut();
        registry
            .extensions
            .entry(TypeId::of::<H>())
            .or_default()
            .version += 1;
    }

    /// Returns `true` if `H`'s extension set changed since `watch` last scanned it.
    pub fn extensions_changed<H: Module>(&self, watch: &ExtensionWatch) -> bool {
        watch.seen != Some(self.extension_version(TypeId::of::<H>()))
    }

    fn extension_version(&self, host: TypeId) -> u64 {
        self.registry
            .borrow()
            .extensions
            .get(&host)
            .map_or(0, |set| set.version)
    }

    /// Snapshot of `H`'s extensions of capability `C`, or `None` if
    /// `only_on_change` is set and nothing changed since `watch` last looked.
    fn scan<H: Module, C: ?Sized + Extension>(
        &self,
        watch: &mut ExtensionWatch,
        only_on_change: bool,
    ) -> Option<Vec<ExtensionHandle<C>>> {
        let registry = self.registry.borrow();
        let set = registry.extensions.get(&TypeId::of::<H>());
        let version = set.map_or(0, |set| set.version);
        if only_on_change && watch.seen == Some(version) {
            return None;
        }
        watch.seen = Some(version);
        Some(set.map(ExtensionSet::handles::<C>).unwrap_or_default())
    }

    /// Returns the first active extension of capability `C` attached to `H`
    /// that is not `last`.
    ///
    /// With `only_on_change`, returns `None` without evaluating any
    /// extension if the set did not change since `watch` last scanned it.
    pub fn find_match<H: Module, C: ?Sized + Extension>(
        &self,
        last: Option<ExtensionId>,
        watch: &mut ExtensionWatch,
        only_on_change: bool,
    ) -> Option<ExtensionHandle<C>> {
        // The registry borrow is released before any extension code runs.
        let candidates = self.scan::<H, C>(watch, only_on_change)?;
        candidates
            .into_iter()
            .find(|handle| handle.is_selectable() && Some(handle.id()) != last)
    }

    /// Returns every active extension of capability `C` attached to `H`,
    /// with the same change gating as [`find_match`](Runtime::find_match).
    pub fn find_matches<H: Module, C: ?Sized + Extension>(
        &self,
        watch: &mut ExtensionWatch,
        only_on_change: bool,
    ) -> Option<Vec<ExtensionHandle<C>>> {
        let candidates = self.scan::<H, C>(watch, only_on_change)?;
        Some(
            candidates
                .into_iter()
                .filter(|handle| handle.is_selectable())
                .collect(),
        )
    }
}

/// The extensions a host module currently has selected for one capability.
///
/// On every [`refresh`](ExtensionSelection::refresh) after a change,
/// extensions that are no longer selected are disposed and newly selected
/// ones are initialized.
pub struct ExtensionSelection<C: ?Sized> {
    selected: Vec<ExtensionHandle<C>>,
    watch: ExtensionWatch,
}

impl<C: ?Sized + Extension> ExtensionSelection<C> {
    /// An empty selection.
    pub fn new() -> Self {
        Self {
            selected: Vec::new(),
            watch: ExtensionWatch::new(),
        }
    }

    /// Rescans `H`'s extensions if they changed. Returns `true` if the
    /// selection was recomputed.
    pub fn refresh<H: Module>(&mut self, runtime: &Runtime) -> Result<bool, RuntimeError> {
        let Some(fresh) = runtime.find_matches::<H, C>(&mut self.watch, true) else {
            return Ok(false);
        };

        for old in &self.selected {
            if !fresh.iter().any(|handle| handle.id() == old.id()) {
                log::debug!("Extension {} `{}` superseded", old.id(), old.borrow().name());
                old.dispose(runtime);
            }
        }
        self.selected = fresh;
        for handle in &self.selected {
            handle.init(runtime)?;
        }
        Ok(true)
    }

    /// Rescans on the next [`refresh`](ExtensionSelection::refresh) regardless of the version.
    pub fn invalidate(&mut self) {
        self.watch.reset();
    }

    /// The selected extensions, in attachment order.
    pub fn selected(&self) -> &[ExtensionHandle<C>] {
        &self.selected
    }

    /// Disposes and deselects everything.
    pub fn dispose_all(&mut self, runtime: &Runtime) {
        for handle in self.selected.drain(..) {
            handle.dispose(runtime);
        }
        self.watch.reset();
    }
}

impl<C: ?Sized + Extension> Default for ExtensionSelection<C> {
    fn default() -> Self {
        Self::new()
    }
}
