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

//! One-shot closures run on the next logic step.

use crate::module::{Hook, Hooks, Module};
use crate::runtime::Runtime;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A deferred piece of work.
pub type Task = Box<dyn FnOnce(&Runtime) -> anyhow::Result<()>>;

/// A shared handle for queueing [`Task`]s, usable while the [`Tasks`]
/// module itself is borrowed.
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<Vec<Task>>>,
}

impl TaskQueue {
    /// Queues `task` for the next UPDATE_PRE.
    pub fn add_task<F>(&self, task: F)
    where
        F: FnOnce(&Runtime) -> anyhow::Result<()> + 'static,
    {
        self.tasks.borrow_mut().push(Box::new(task));
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    fn take(&self) -> Vec<Task> {
        std::mem::take(&mut *self.tasks.borrow_mut())
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("len", &self.len()).finish()
    }
}

/// Runs queued tasks once, in order, on UPDATE_PRE. A failing task is fatal.
#[derive(Debug, Default)]
pub struct Tasks {
    queue: TaskQueue,
}

impl Tasks {
    /// A handle onto this module's queue.
    pub fn queue(&self) -> TaskQueue {
        self.queue.clone()
    }

    fn run(&mut self, runtime: &Runtime) -> anyhow::Result<()> {
        // Tasks queued while running wait for the next step.
        for task in self.queue.take() {
            task(runtime)?;
        }
        Ok(())
    }
}

impl Module for Tasks {
    fn create() -> anyhow::Result<Self> {
        Ok(Self::default())
    }

    fn hooks(hooks: &mut Hooks<Self>) {
        hooks.on(Hook::UpdatePre, Self::run).on(Hook::Dispose, |tasks, _| {
            let dropped = tasks.queue.take();
            if !dropped.is_empty() {
                log::debug!("Dropping {} pending tasks.", dropped.len());
            }
            Ok(())
        });
    }
}
