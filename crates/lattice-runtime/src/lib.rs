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

//! # Lattice Runtime
//!
//! A pluggable application runtime: a registry of lazily built singleton
//! modules ordered by their dependencies, extensions attached to host
//! modules, request processors, and a phased scheduler driving it all.

#![warn(missing_docs)]

pub mod builtin;
pub mod error;
pub mod extension;
pub mod module;
pub mod processing;
mod registry;
pub mod runtime;

pub use builtin::{
    Event, EventChange, EventId, EventList, Events, Profiler, Standard, Standards, TaskQueue, Tasks,
};
pub use error::RuntimeError;
pub use extension::{Extension, ExtensionHandle, ExtensionId, ExtensionSelection, ExtensionWatch};
pub use module::{Hook, Hooks, Module, ModuleKey, ModuleRef, Overrides};
pub use processing::{Dispatcher, Processor, Processors, Request};
pub use runtime::{CloseHandle, Runtime, RuntimeEvent, RuntimePhase, TickReport};

pub use lattice_core::RuntimeConfig;
