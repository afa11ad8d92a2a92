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

//! Errors surfaced by the runtime.
//!
//! Circular dependencies and failed requests are not errors here: the former
//! is logged and treated as satisfied, the latter is logged by the processor
//! that ran the request.

use crate::module::Hook;
use crate::runtime::RuntimePhase;
use thiserror::Error;

/// An error raised by the module registry, the extension mechanism or the scheduler.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The requested module was never registered.
    #[error("module `{0}` is not registered")]
    ModuleNotFound(&'static str),
    /// A module's constructor failed.
    #[error("failed to construct module `{module}`")]
    ModuleConstruction {
        /// Name of the module being built.
        module: &'static str,
        /// The constructor's error.
        #[source]
        source: anyhow::Error,
    },
    /// A module was registered as an override of its own type.
    #[error("module `{0}` cannot override itself")]
    SelfOverride(&'static str),
    /// The module is already borrowed, typically because one of its hooks is running.
    #[error("module `{0}` is busy")]
    ModuleBusy(&'static str),
    /// A lifecycle hook returned an error.
    #[error("{hook} hook of module `{module}` failed")]
    Hook {
        /// Name of the module whose hook failed.
        module: &'static str,
        /// The failing lifecycle tag.
        hook: Hook,
        /// The hook's error.
        #[source]
        source: anyhow::Error,
    },
    /// An extension failed to initialize when it was selected.
    #[error("failed to initialize extension `{extension}`")]
    ExtensionInit {
        /// Name of the extension.
        extension: String,
        /// The extension's error.
        #[source]
        source: anyhow::Error,
    },
    /// A tick panicked.
    #[error("tick panicked: {0}")]
    TickPanicked(String),
    /// The scheduler was driven out of order.
    #[error("invalid runtime transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Phase the runtime was in.
        from: RuntimePhase,
        /// Phase that was requested.
        to: RuntimePhase,
    },
}
