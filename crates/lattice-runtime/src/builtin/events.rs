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

//! Change-driven events polled on every logic step.
//!
//! An [`Event`] pairs a trigger predicate with a reaction. The [`Events`]
//! module asks every registered event whether it triggered during
//! UPDATE_PRE and runs the reaction of those that did. [`EventChange`] is
//! the common case: it fires whenever a watched value changes.

use crate::module::{Hook, Hooks, Module};
use crate::runtime::Runtime;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A condition polled once per logic step, with the reaction to run when it holds.
pub trait Event: 'static {
    /// Returns `true` if the event fired since the previous poll.
    fn triggered(&mut self) -> bool;

    /// Runs once for every poll that reported `true`.
    fn on_event(&mut self, runtime: &Runtime) -> anyhow::Result<()>;
}

/// Identity of a registered event, used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u64);

type SharedEvent = Rc<RefCell<dyn Event>>;

#[derive(Default)]
struct EventTable {
    entries: Vec<(EventId, SharedEvent)>,
    next_id: u64,
}

/// A shared handle onto the [`Events`] table, usable from inside event
/// reactions and other modules' hooks.
#[derive(Clone, Default)]
pub struct EventList {
    table: Rc<RefCell<EventTable>>,
}

impl EventList {
    /// Starts polling `event` on the next logic step.
    pub fn add_event(&self, event: impl Event) -> EventId {
        let mut table = self.table.borrow_mut();
        let id = EventId(table.next_id);
        table.next_id += 1;
        let event: SharedEvent = Rc::new(RefCell::new(event));
        table.entries.push((id, event));
        id
    }

    /// Stops polling the event. Returns `false` if it was not registered.
    pub fn remove_event(&self, id: EventId) -> bool {
        let mut table = self.table.borrow_mut();
        let before = table.entries.len();
        table.entries.retain(|(entry, _)| *entry != id);
        table.entries.len() != before
    }

    /// Returns `true` if the event is registered.
    pub fn contains(&self, id: EventId) -> bool {
        self.table.borrow().entries.iter().any(|(entry, _)| *entry == id)
    }

    /// Number of registered events.
    pub fn len(&self) -> usize {
        self.table.borrow().entries.len()
    }

    /// Returns `true` if no event is registered.
    pub fn is_empty(&self) -> bool {
        self.table.borrow().entries.is_empty()
    }

    fn snapshot(&self) -> Vec<(EventId, SharedEvent)> {
        self.table.borrow().entries.clone()
    }

    fn clear(&self) -> usize {
        std::mem::take(&mut self.table.borrow_mut().entries).len()
    }
}

impl fmt::Debug for EventList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventList").field("len", &self.len()).finish()
    }
}

/// Polls registered [`Event`]s on UPDATE_PRE, in registration order.
/// A failing reaction is fatal.
#[derive(Debug, Default)]
pub struct Events {
    list: EventList,
}

impl Events {
    /// A handle onto this module's event table.
    pub fn list(&self) -> EventList {
        self.list.clone()
    }

    /// Starts polling `event`. See [`EventList::add_event`].
    pub fn add_event(&self, event: impl Event) -> EventId {
        self.list.add_event(event)
    }

    /// Stops polling an event. See [`EventList::remove_event`].
    pub fn remove_event(&self, id: EventId) -> bool {
        self.list.remove_event(id)
    }

    fn poll(&mut self, runtime: &Runtime) -> anyhow::Result<()> {
        // Reactions may add or remove events; additions wait for the next step.
        for (id, event) in self.list.snapshot() {
            if !self.list.contains(id) {
                continue;
            }
            let mut event = event.borrow_mut();
            if event.triggered() {
                event.on_event(runtime)?;
            }
        }
        Ok(())
    }
}

impl Module for Events {
    fn create() -> anyhow::Result<Self> {
        Ok(Self::default())
    }

    fn hooks(hooks: &mut Hooks<Self>) {
        hooks.on(Hook::UpdatePre, Self::poll).on(Hook::Dispose, |events, _| {
            let dropped = events.list.clear();
            if dropped > 0 {
                log::debug!("Dropping {dropped} events.");
            }
            Ok(())
        });
    }
}

/// Fires whenever the value returned by a reference closure changes.
///
/// The first poll always fires, reporting the initial value.
///
/// ```ignore
/// let fps = Rc::new(Cell::new(60));
/// let watched = Rc::clone(&fps);
/// events.add_event(EventChange::new(
///     move || watched.get(),
///     |fps, _| {
///         log::info!("fps is now {fps}");
///         Ok(())
///     },
/// ));
/// ```
pub struct EventChange<T> {
    reference: Box<dyn FnMut() -> T>,
    on_change: Box<dyn FnMut(&T, &Runtime) -> anyhow::Result<()>>,
    current: Option<T>,
}

impl<T: PartialEq + 'static> EventChange<T> {
    /// Watches `reference`, running `on_change` with each new value.
    pub fn new<R, F>(reference: R, on_change: F) -> Self
    where
        R: FnMut() -> T + 'static,
        F: FnMut(&T, &Runtime) -> anyhow::Result<()> + 'static,
    {
        Self {
            reference: Box::new(reference),
            on_change: Box::new(on_change),
            current: None,
        }
    }

    /// The value seen by the last poll.
    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }
}

impl<T: PartialEq + 'static> Event for EventChange<T> {
    fn triggered(&mut self) -> bool {
        let value = (self.reference)();
        let changed = self.current.as_ref() != Some(&value);
        self.current = Some(value);
        changed
    }

    fn on_event(&mut self, runtime: &Runtime) -> anyhow::Result<()> {
        match &self.current {
            Some(value) => (self.on_change)(value, runtime),
            None => Ok(()),
        }
    }
}
