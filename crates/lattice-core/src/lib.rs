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

//! # Lattice Core
//!
//! Leaf primitives shared by every part of the runtime: wall-clock gates,
//! the request queue used by the processors, the runtime event bus and
//! the runtime configuration.

#![warn(missing_docs)]

pub mod config;
pub mod event;
pub mod queue;
pub mod utils;

pub use config::RuntimeConfig;
pub use queue::RequestQueue;
pub use utils::timer::{Delta, ProfileTimer, Stopwatch, Timer};
