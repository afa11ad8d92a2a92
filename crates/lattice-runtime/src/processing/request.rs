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

use super::context::ContextJob;
use super::worker::ResourceJob;
use super::{ContextRequest, ResourceRequest};
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

struct Facet {
    kind: TypeId,
    name: &'static str,
    value: Box<dyn Any>,
}

/// A unit of work, made of one facet per kind of processor that should see it.
///
/// ```ignore
/// let request = Request::resource(|| load_mesh("tree.obj"))
///     .with::<ContextJob>(Arc::new(|| upload_mesh()));
/// dispatcher.send_request(request);
/// ```
#[derive(Default)]
pub struct Request {
    facets: Vec<Facet>,
}

impl Request {
    /// A request with no facet; no processor will accept it.
    pub fn new() -> Self {
        Self::default()
    }

    /// A request carrying a single [`ResourceRequest`].
    pub fn resource(job: impl ResourceRequest + 'static) -> Self {
        let job: ResourceJob = Arc::new(job);
        Self::new().with(job)
    }

    /// A request carrying a single [`ContextRequest`].
    pub fn context(job: impl ContextRequest + 'static) -> Self {
        let job: ContextJob = Arc::new(job);
        Self::new().with(job)
    }

    /// Adds (or replaces) the facet of kind `K`.
    pub fn with<K: Clone + 'static>(mut self, facet: K) -> Self {
        let kind = TypeId::of::<K>();
        self.facets.retain(|existing| existing.kind != kind);
        self.facets.push(Facet {
            kind,
            name: type_name::<K>(),
            value: Box::new(facet),
        });
        self
    }

    /// A copy of the facet of kind `K`.
    pub fn facet<K: Clone + 'static>(&self) -> Option<K> {
        self.facets
            .iter()
            .find(|facet| facet.kind == TypeId::of::<K>())
            .and_then(|facet| facet.value.downcast_ref::<K>())
            .cloned()
    }

    /// Returns `true` if the request carries a facet of type `kind`.
    pub fn has_kind(&self, kind: TypeId) -> bool {
        self.facets.iter().any(|facet| facet.kind == kind)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.facets.iter().map(|facet| facet.name))
            .finish()
    }
}
