// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rig resources and how they get bound to a test case.
//!
//! A test rig allocates resources in groups, one group per physical device
//! under test. The [`ResourceBinder`] turns a loosely-typed map of groups
//! into a [`BoundContext`]: either a single bound group, or one group per
//! named role for multi-device scenarios.

mod binder;
mod capability;

pub use binder::*;
pub use capability::*;

use camino::Utf8PathBuf;
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;

/// The rig allocator's numeric id for one resource group.
pub type ResourceId = i64;

/// A map of resource groups keyed by allocator id, in allocation order.
///
/// Iteration order is the tie-breaker when two groups claim the same role,
/// so the map type must preserve insertion order.
pub type ResourceMap = IndexMap<ResourceId, ResourceGroup>;

/// One device under test and everything allocated alongside it.
#[derive(Debug, Default)]
pub struct ResourceGroup {
    name: String,
    roles: Vec<String>,
    sw_path: Option<Utf8PathBuf>,
    sw_revision: Option<String>,
    handles: DebugIgnore<IndexMap<ResourceKind, SharedResource>>,
}

impl ResourceGroup {
    /// Creates an empty group with the allocator's resource name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declares the roles this group can play in a multi-device test.
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Attaches the software build path delivered by the build system.
    pub fn with_sw_path(mut self, sw_path: impl Into<Utf8PathBuf>) -> Self {
        self.sw_path = Some(sw_path.into());
        self
    }

    /// Attaches the software revision delivered by the build system.
    pub fn with_sw_revision(mut self, sw_revision: impl Into<String>) -> Self {
        self.sw_revision = Some(sw_revision.into());
        self
    }

    /// Adds one resource handle under its capability key.
    pub fn with_resource(mut self, kind: ResourceKind, resource: SharedResource) -> Self {
        self.handles.insert(kind, resource);
        self
    }

    /// The allocator's resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared role tags.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// The software build path, if delivered.
    pub fn sw_path(&self) -> Option<&Utf8PathBuf> {
        self.sw_path.as_ref()
    }

    /// The software revision, if delivered.
    pub fn sw_revision(&self) -> Option<&str> {
        self.sw_revision.as_deref()
    }

    pub(crate) fn handles(&self) -> &IndexMap<ResourceKind, SharedResource> {
        &self.handles
    }
}
