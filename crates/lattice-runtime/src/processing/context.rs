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

//! The context-thread processor: runs requests on the runtime thread within
//! a per-tick time budget.

use super::{execute_isolated, Processor, Request};
use crate::extension::Extension;
use crate::runtime::Runtime;
use lattice_core::{RequestQueue, Stopwatch};
use std::any::TypeId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Work that must run on the runtime thread, such as handing a loaded
/// resource to a module.
pub trait ContextRequest: Send + Sync {
    /// Performs the work.
    fn execute_context(&self) -> anyhow::Result<()>;
}

impl<F> ContextRequest for F
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    fn execute_context(&self) -> anyhow::Result<()> {
        self()
    }
}

/// The [`Request`] facet consumed by a [`ContextProcessor`].
pub type ContextJob = Arc<dyn ContextRequest>;

/// A thread-safe way to queue [`ContextJob`]s, e.g. from a resource request
/// handing its result back to the runtime thread.
#[derive(Clone)]
pub struct ContextSender {
    queue: Arc<RequestQueue<ContextJob>>,
    history: Arc<AtomicUsize>,
}

impl ContextSender {
    /// Queues `job`. Returns `false` if the processor has been shut down.
    pub fn send(&self, job: ContextJob) -> bool {
        match self.queue.add_request(job) {
            Ok(()) => {
                self.history.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                log::warn!("Context processor is shut down; request rejected.");
                false
            }
        }
    }
}

/// Runs [`ContextJob`]s in FIFO order during UPDATE_PRE until the tick's
/// budget is spent.
///
/// The budget is checked after each job, so at least one queued job runs
/// per tick and a slow job may overrun it.
pub struct ContextProcessor {
    sender: ContextSender,
}

impl ContextProcessor {
    /// Creates a processor with an empty queue.
    pub fn new() -> Self {
        Self {
            sender: ContextSender {
                queue: Arc::new(RequestQueue::new()),
                history: Arc::new(AtomicUsize::new(0)),
            },
        }
    }

    /// A sender other threads can queue jobs through.
    pub fn sender(&self) -> ContextSender {
        self.sender.clone()
    }

    /// Queues `job`. Returns `false` if the processor has been shut down.
    pub fn push(&self, job: ContextJob) -> bool {
        self.sender.send(job)
    }

    /// Runs queued jobs until `budget` is spent or the queue is empty.
    /// Returns the number of jobs run.
    pub fn process(&self, budget: Duration) -> usize {
        let mut watch = Stopwatch::new();
        let mut remaining = budget;
        let mut executed = 0;

        while let Some(job) = self.sender.queue.accept_next_request() {
            execute_isolated("Context", || job.execute_context());
            executed += 1;

            match remaining.checked_sub(watch.lap()) {
                Some(left) if !left.is_zero() => remaining = left,
                _ => break,
            }
        }
        executed
    }

    /// Runs every queued job regardless of budget. Returns the number of jobs run.
    pub fn complete_all(&self) -> usize {
        let mut executed = 0;
        while let Some(job) = self.sender.queue.accept_next_request() {
            execute_isolated("Context", || job.execute_context());
            executed += 1;
        }
        executed
    }
}

impl Default for ContextProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extension for ContextProcessor {
    fn name(&self) -> &str {
        "Context Processor"
    }

    fn is_active(&self) -> bool {
        true
    }

    fn dispose(&mut self, _runtime: &Runtime) {
        let executed = self.complete_all();
        if executed > 0 {
            log::debug!("Completed {executed} context requests on dispose.");
        }
    }
}

impl Processor for ContextProcessor {
    fn request_kind(&self) -> TypeId {
        TypeId::of::<ContextJob>()
    }

    fn submit(&self, request: &Request) -> bool {
        request
            .facet::<ContextJob>()
            .is_some_and(|job| self.push(job))
    }

    fn update(&self, runtime: &Runtime) {
        self.process(runtime.config().processor_budget());
    }

    fn pending(&self) -> usize {
        self.sender.queue.count()
    }

    fn history(&self) -> usize {
        self.sender.history.load(Ordering::Relaxed)
    }
}
