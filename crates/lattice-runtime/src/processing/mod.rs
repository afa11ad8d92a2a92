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

//! Request processing.
//!
//! A [`Request`] carries one facet per kind of work it needs. The
//! [`Dispatcher`] hands it to every selected [`Processor`] whose kind it
//! carries. Two processors ship with the [`Processors`] module: a
//! [`WorkerProcessor`] running resource requests on a background thread and
//! a [`ContextProcessor`] running context requests on the runtime thread
//! within a per-tick budget.

mod context;
mod request;
mod worker;

pub use context::{ContextJob, ContextProcessor, ContextRequest, ContextSender};
pub use request::Request;
pub use worker::{ResourceJob, ResourceRequest, WorkerProcessor};

use crate::error::RuntimeError;
use crate::extension::{Extension, ExtensionHandle, ExtensionSelection};
use crate::module::{Hook, Hooks, Module};
use crate::runtime::Runtime;
use std::any::TypeId;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

/// An executor of one kind of request.
///
/// Methods take `&self` so a processor can accept requests while it is
/// being updated.
pub trait Processor: Extension {
    /// The facet type this processor consumes from a [`Request`].
    fn request_kind(&self) -> TypeId;

    /// Takes the matching facet out of `request` and queues it. Returns
    /// `false` if the request was rejected.
    fn submit(&self, request: &Request) -> bool;

    /// Called on every UPDATE_PRE.
    fn update(&self, _runtime: &Runtime) {}

    /// Requests queued but not yet executed.
    fn pending(&self) -> usize;

    /// Requests accepted since creation.
    fn history(&self) -> usize;
}

/// Routes requests to the selected processors.
///
/// Cloning is cheap; clones share the same processor list.
#[derive(Clone, Default)]
pub struct Dispatcher {
    processors: Rc<RefCell<Vec<ExtensionHandle<dyn Processor>>>>,
}

impl Dispatcher {
    /// Hands `request` to every processor whose kind it carries. Returns the
    /// number of processors that accepted it.
    pub fn send_request(&self, request: Request) -> usize {
        let processors = self.processors.borrow().clone();
        let accepted = processors
            .iter()
            .filter(|handle| {
                let processor = handle.borrow();
                request.has_kind(processor.request_kind()) && processor.submit(&request)
            })
            .count();
        if accepted == 0 {
            log::warn!("No processor accepted request {request:?}");
        }
        accepted
    }

    /// Number of processors requests are routed to.
    pub fn processor_count(&self) -> usize {
        self.processors.borrow().len()
    }

    fn replace(&self, processors: Vec<ExtensionHandle<dyn Processor>>) {
        *self.processors.borrow_mut() = processors;
    }
}

/// Host module of every [`Processor`].
///
/// On INIT it attaches a [`WorkerProcessor`] and a [`ContextProcessor`].
/// Selected processors are refreshed and updated on every UPDATE_PRE and
/// disposed (draining their queues) on DISPOSE.
#[derive(Default)]
pub struct Processors {
    selection: ExtensionSelection<dyn Processor>,
    dispatcher: Dispatcher,
    context: Option<ContextSender>,
}

impl Processors {
    /// A dispatcher routing to this module's processors.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// A thread-safe sender onto the built-in context processor, available after INIT.
    pub fn context_sender(&self) -> Option<ContextSender> {
        self.context.clone()
    }

    fn init(&mut self, runtime: &Runtime) -> anyhow::Result<()> {
        runtime.register_extension::<Processors, dyn Processor>(Rc::new(RefCell::new(
            WorkerProcessor::new(),
        )))?;

        let context = ContextProcessor::new();
        self.context = Some(context.sender());
        runtime.register_extension::<Processors, dyn Processor>(Rc::new(RefCell::new(context)))?;

        self.reselect(runtime)?;
        Ok(())
    }

    fn reselect(&mut self, runtime: &Runtime) -> Result<(), RuntimeError> {
        if self.selection.refresh::<Processors>(runtime)? {
            self.dispatcher.replace(self.selection.selected().to_vec());
            log::debug!("{} processors selected.", self.dispatcher.processor_count());
        }
        Ok(())
    }

    fn update(&mut self, runtime: &Runtime) -> anyhow::Result<()> {
        self.reselect(runtime)?;
        for processor in self.selection.selected() {
            processor.borrow().update(runtime);
        }
        Ok(())
    }

    fn profile(&mut self, runtime: &Runtime) -> anyhow::Result<()> {
        for processor in self.selection.selected() {
            let processor = processor.borrow();
            runtime.profile(processor.name(), "Requests", processor.pending());
            runtime.profile(processor.name(), "History", processor.history());
        }
        Ok(())
    }

    fn dispose(&mut self, runtime: &Runtime) -> anyhow::Result<()> {
        self.dispatcher.replace(Vec::new());
        self.selection.dispose_all(runtime);
        self.context = None;
        Ok(())
    }
}

impl Module for Processors {
    fn create() -> anyhow::Result<Self> {
        Ok(Self::default())
    }

    fn hooks(hooks: &mut Hooks<Self>) {
        hooks
            .on(Hook::Init, Self::init)
            .on(Hook::UpdatePre, Self::update)
            .on(Hook::Profile, Self::profile)
            .on(Hook::Dispose, Self::dispose);
    }
}

impl Runtime {
    /// Routes `request` through the [`Processors`] module's dispatcher.
    ///
    /// Requests executed by the processors themselves run while the module
    /// is borrowed, so they get [`RuntimeError::ModuleBusy`] here and should
    /// hold on to a [`Dispatcher`] instead.
    pub fn send_request(&self, request: Request) -> Result<usize, RuntimeError> {
        let dispatcher = self.get::<Processors>()?.try_borrow()?.dispatcher();
        Ok(dispatcher.send_request(request))
    }
}

/// Runs one request, logging its error or panic instead of propagating it.
/// Returns `true` if the request succeeded.
pub(crate) fn execute_isolated(kind: &str, job: impl FnOnce() -> anyhow::Result<()>) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            log::error!("{kind} request failed: {e:#}");
            false
        }
        Err(_) => {
            log::error!("{kind} request panicked.");
            false
        }
    }
}
