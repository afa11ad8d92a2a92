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

//! The worker-thread processor.

use super::{execute_isolated, Processor, Request};
use crate::extension::Extension;
use crate::runtime::Runtime;
use anyhow::Context as _;
use lattice_core::RequestQueue;
use std::any::TypeId;
use std::cell::Cell;
use std::sync::Arc;
use std::thread;

/// Work that runs off the runtime thread, typically I/O or loading.
pub trait ResourceRequest: Send + Sync {
    /// Performs the work.
    fn execute_resource(&self) -> anyhow::Result<()>;
}

impl<F> ResourceRequest for F
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    fn execute_resource(&self) -> anyhow::Result<()> {
        self()
    }
}

/// The [`Request`] facet consumed by a [`WorkerProcessor`].
pub type ResourceJob = Arc<dyn ResourceRequest>;

/// Runs [`ResourceJob`]s one at a time, in submission order, on a
/// dedicated thread.
///
/// The thread sleeps on the queue while it is empty. Disposing closes the
/// queue and joins the thread once every queued job has run.
pub struct WorkerProcessor {
    queue: Arc<RequestQueue<ResourceJob>>,
    handle: Option<thread::JoinHandle<()>>,
    history: Cell<usize>,
}

impl WorkerProcessor {
    /// Creates an idle processor. The thread starts on [`Extension::init`].
    pub fn new() -> Self {
        Self {
            queue: Arc::new(RequestQueue::new()),
            handle: None,
            history: Cell::new(0),
        }
    }

    /// Queues `job`. Returns `false` if the processor has been shut down.
    pub fn push(&self, job: ResourceJob) -> bool {
        match self.queue.add_request(job) {
            Ok(()) => {
                self.history.set(self.history.get() + 1);
                true
            }
            Err(_) => {
                log::warn!("Resource worker is shut down; request rejected.");
                false
            }
        }
    }

    /// Returns `true` while the worker thread is alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        if self.handle.is_some() {
            log::warn!("Resource worker is already running.");
            return Ok(());
        }
        if self.queue.is_closed() {
            self.queue = Arc::new(RequestQueue::new());
        }

        let queue = Arc::clone(&self.queue);
        let handle = thread::Builder::new()
            .name("lattice-resource-worker".to_owned())
            .spawn(move || {
                log::info!("Resource worker thread started.");
                while let Some(job) = queue.wait_next_request() {
                    execute_isolated("Resource", || job.execute_resource());
                }
                log::info!("Resource worker thread stopped.");
            })
            .context("failed to spawn the resource worker thread")?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Closes the queue and waits for the remaining jobs to finish.
    fn stop(&mut self) {
        self.queue.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Resource worker thread panicked.");
            }
        }
    }
}

impl Default for WorkerProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extension for WorkerProcessor {
    fn name(&self) -> &str {
        "Resource Worker"
    }

    fn is_active(&self) -> bool {
        true
    }

    fn init(&mut self, _runtime: &Runtime) -> anyhow::Result<()> {
        self.start()
    }

    fn dispose(&mut self, _runtime: &Runtime) {
        self.stop();
    }
}

impl Processor for WorkerProcessor {
    fn request_kind(&self) -> TypeId {
        TypeId::of::<ResourceJob>()
    }

    fn submit(&self, request: &Request) -> bool {
        request
            .facet::<ResourceJob>()
            .is_some_and(|job| self.push(job))
    }

    fn pending(&self) -> usize {
        self.queue.count()
    }

    fn history(&self) -> usize {
        self.history.get()
    }
}

impl Drop for WorkerProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}
