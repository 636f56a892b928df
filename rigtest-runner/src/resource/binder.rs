// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Role resolution and binding of resource groups to a test context.

use crate::{
    errors::{ConfigurationError, DisplayErrorChain, ResourceError},
    log_sink::{LogProxy, LogSink},
    reporter::OutcomeAggregator,
    resource::{
        PRODUCT_NAME_PROPERTY, PostSetupContext, ResourceGroup, ResourceId, ResourceKind,
        ResourceMap, SharedResource,
    },
    runner::TestId,
};
use camino::Utf8PathBuf;
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use std::{collections::BTreeSet, sync::Arc};

/// Resolves a [`ResourceMap`] into a [`BoundContext`] for one test case.
#[derive(Debug)]
pub struct ResourceBinder {
    test_id: TestId,
    service_ids: BTreeSet<i64>,
}

impl ResourceBinder {
    /// Creates a binder for the given test case.
    pub fn new(test_id: TestId) -> Self {
        Self {
            test_id,
            service_ids: BTreeSet::new(),
        }
    }

    /// Declares registered test ids that belong to rig-service scenarios.
    /// The coredump sweep is skipped for those.
    pub fn service_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.service_ids = ids.into_iter().collect();
        self
    }

    /// The test case this binder serves.
    pub fn test_id(&self) -> &TestId {
        &self.test_id
    }

    /// Binds the resource map, resolving roles for multi-device tests.
    ///
    /// With exactly one group, roles are ignored and the group binds as the
    /// context's single resource. With several groups, a non-empty role
    /// list is required; each role picks the first group (in map order)
    /// whose declared tags contain it case-insensitively.
    pub fn bind(
        &self,
        groups: &ResourceMap,
        roles: Option<&[String]>,
        sink: &LogSink,
    ) -> Result<BoundContext, ConfigurationError> {
        if groups.is_empty() {
            return Err(ConfigurationError::NoResources {
                test_id: self.test_id.to_string(),
            });
        }

        if groups.len() == 1 {
            let (group_id, group) = groups.iter().next().expect("one group present");
            let bound = self.bind_group(*group_id, group, None, sink)?;
            return Ok(BoundContext {
                single: Some(bound),
                by_role: IndexMap::new(),
            });
        }

        let roles = match roles {
            Some(roles) if !roles.is_empty() => roles,
            _ => {
                return Err(ConfigurationError::NoRoles {
                    test_id: self.test_id.to_string(),
                });
            }
        };
        if roles.iter().any(|role| role.is_empty()) {
            return Err(ConfigurationError::EmptyRole {
                test_id: self.test_id.to_string(),
                roles: roles.to_vec(),
            });
        }

        let mut by_role = IndexMap::new();
        for role in roles {
            let wanted = role.to_lowercase();
            let found = groups.iter().find(|(_, group)| {
                group
                    .roles()
                    .iter()
                    .any(|tag| tag.to_lowercase() == wanted)
            });
            let Some((group_id, group)) = found else {
                return Err(ConfigurationError::RoleNotFound {
                    role: role.clone(),
                    available: groups
                        .values()
                        .flat_map(|group| group.roles().iter().cloned())
                        .collect(),
                });
            };
            sink.debug(format!("setting up the target `{wanted}`"));
            let bound = self.bind_group(*group_id, group, Some(wanted.clone()), sink)?;
            by_role.insert(wanted, bound);
        }
        Ok(BoundContext {
            single: None,
            by_role,
        })
    }

    fn bind_group(
        &self,
        group_id: ResourceId,
        group: &ResourceGroup,
        role: Option<String>,
        sink: &LogSink,
    ) -> Result<BoundGroup, ConfigurationError> {
        let bound = BoundGroup {
            group_id,
            name: group.name().to_owned(),
            role,
            sw_path: group.sw_path().cloned(),
            sw_revision: group.sw_revision().map(str::to_owned),
            handles: DebugIgnore(group.handles().clone()),
        };

        for (kind, handle) in bound.handles.iter() {
            if !kind.is_addressable() {
                continue;
            }
            let scope = format!(
                "{kind},{},{}",
                bound.role.as_deref().unwrap_or(""),
                bound.name
            );
            match handle.lock() {
                Ok(mut resource) => resource.attach_logger(LogProxy::new(sink, scope)),
                Err(_) => tracing::warn!("cannot attach a logger to the poisoned `{kind}` handle"),
            }
        }

        if self.coredump_sweep_eligible() {
            bound.sweep_coredumps();
        }

        let cx = PostSetupContext {
            test_id: &self.test_id,
            role: bound.role.as_deref(),
        };
        for (kind, handle) in bound.handles.iter() {
            let mut resource = handle
                .lock()
                .map_err(|_| ConfigurationError::ResourceSetup {
                    kind: *kind,
                    error: ResourceError::Poisoned,
                })?;
            resource
                .post_setup(&cx)
                .map_err(|error| ConfigurationError::ResourceSetup { kind: *kind, error })?;
        }

        Ok(bound)
    }

    /// Core dumps are swept for regular database-registered test cases
    /// only; rig-service scenarios leave them in place.
    fn coredump_sweep_eligible(&self) -> bool {
        match self.test_id {
            TestId::Registered(id) => !self.service_ids.contains(&id),
            TestId::Adhoc(_) => false,
        }
    }
}

/// One resource group bound to a test context.
#[derive(Debug)]
pub struct BoundGroup {
    group_id: ResourceId,
    name: String,
    role: Option<String>,
    sw_path: Option<Utf8PathBuf>,
    sw_revision: Option<String>,
    handles: DebugIgnore<IndexMap<ResourceKind, SharedResource>>,
}

impl BoundGroup {
    /// The allocator id of the underlying group.
    pub fn group_id(&self) -> ResourceId {
        self.group_id
    }

    /// The allocator's resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The role this group was bound under, lower-cased. `None` for the
    /// single-group case.
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    /// The software build path, if delivered.
    pub fn sw_path(&self) -> Option<&Utf8PathBuf> {
        self.sw_path.as_ref()
    }

    /// The software revision, if delivered.
    pub fn sw_revision(&self) -> Option<&str> {
        self.sw_revision.as_deref()
    }

    /// Looks up a capability. Absent capabilities are `None`, never an
    /// error.
    pub fn resource(&self, kind: ResourceKind) -> Option<&SharedResource> {
        self.handles.get(&kind)
    }

    /// The target-control link, if bound.
    pub fn tal(&self) -> Option<&SharedResource> {
        self.resource(ResourceKind::Tal)
    }

    /// The navigation channel, if bound.
    pub fn navigation(&self) -> Option<&SharedResource> {
        self.resource(ResourceKind::Navigation)
    }

    /// The verification channel, if bound.
    pub fn verification(&self) -> Option<&SharedResource> {
        self.resource(ResourceKind::Verification)
    }

    /// The sound card, if bound.
    pub fn sound_card(&self) -> Option<&SharedResource> {
        self.resource(ResourceKind::SoundCard)
    }

    /// The serial console capture, if bound.
    pub fn serial_output(&self) -> Option<&SharedResource> {
        self.resource(ResourceKind::SerialOutput)
    }

    /// Enumerates the live device channels of this group, skipping plain
    /// data handles.
    pub fn device_resources(&self) -> Vec<(ResourceKind, SharedResource)> {
        self.handles
            .iter()
            .filter(|(_, handle)| {
                handle
                    .lock()
                    .map(|resource| resource.is_device())
                    .unwrap_or(false)
            })
            .map(|(kind, handle)| (*kind, Arc::clone(handle)))
            .collect()
    }

    /// The product name reported by the target-control link, if any.
    pub fn product_name(&self) -> Option<String> {
        let tal = self.tal()?;
        let resource = tal.lock().ok()?;
        resource.properties().get(PRODUCT_NAME_PROPERTY).cloned()
    }

    /// Retrieves the device syslog through the target-control link.
    ///
    /// On failure the outcome is annotated with the full error chain and
    /// the serial console capture is tried as a fallback; capture failures
    /// are annotated too. Never raises.
    pub fn retrieve_syslog(&self, results: &mut OutcomeAggregator) -> Option<Utf8PathBuf> {
        let tal = self.tal()?;
        let retrieved = tal
            .lock()
            .map_err(|_| ResourceError::Poisoned)
            .and_then(|mut resource| resource.syslog());
        match retrieved {
            Ok(path) => Some(path),
            Err(error) => {
                results.annotate([(
                    "Sys log retrieve error".to_owned(),
                    DisplayErrorChain::new(&error).to_string(),
                )]);
                if let Some(serial) = self.serial_output() {
                    let captured = serial
                        .lock()
                        .map_err(|_| ResourceError::Poisoned)
                        .and_then(|mut resource| resource.capture_output());
                    if captured.is_err() {
                        results.annotate([(
                            "Serial output retrieve".to_owned(),
                            "It is impossible to retrieve serial output".to_owned(),
                        )]);
                    }
                    let fep_captured = serial
                        .lock()
                        .map_err(|_| ResourceError::Poisoned)
                        .and_then(|mut resource| resource.capture_fep_output());
                    if fep_captured.is_err() {
                        results.annotate([(
                            "FEP serial output retrieve".to_owned(),
                            "It is impossible to retrieve FEP serial output".to_owned(),
                        )]);
                    }
                }
                None
            }
        }
    }

    /// Retrieves report files for the given result row through the
    /// target-control link, if it supports reporting.
    pub fn retrieve_reports(&self, results: &mut OutcomeAggregator, result_id: i64) {
        let Some(tal) = self.tal() else {
            return;
        };
        let retrieved = tal
            .lock()
            .map_err(|_| ResourceError::Poisoned)
            .and_then(|mut resource| resource.fetch_reports(result_id));
        match retrieved {
            Ok(()) | Err(ResourceError::Unsupported) => {}
            Err(error) => {
                results.annotate([(
                    "Reports retrieve error".to_owned(),
                    DisplayErrorChain::new(&error).to_string(),
                )]);
            }
        }
    }

    fn sweep_coredumps(&self) {
        let Some(tal) = self.tal() else {
            return;
        };
        let swept = tal
            .lock()
            .map_err(|_| ResourceError::Poisoned)
            .and_then(|mut resource| {
                resource.fetch_coredumps()?;
                resource.remove_coredumps()
            });
        if let Err(error) = swept {
            // A broken sweep must not abort the test; a real DUT problem
            // will surface later on its own.
            tracing::warn!("an exception happened in the coredump sweep: {error}, continuing");
        }
    }
}

/// The materialized resource view a test executes against.
#[derive(Debug)]
pub struct BoundContext {
    single: Option<BoundGroup>,
    by_role: IndexMap<String, BoundGroup>,
}

impl BoundContext {
    /// The single bound group of a one-device test.
    pub fn single(&self) -> Option<&BoundGroup> {
        self.single.as_ref()
    }

    /// Looks up the group bound under `role`, case-insensitively.
    pub fn role(&self, role: &str) -> Option<&BoundGroup> {
        self.by_role.get(&role.to_lowercase())
    }

    /// Iterates role names and their bound groups in binding order.
    pub fn roles(&self) -> impl Iterator<Item = (&str, &BoundGroup)> {
        self.by_role
            .iter()
            .map(|(role, group)| (role.as_str(), group))
    }

    /// Iterates every bound group.
    pub fn groups(&self) -> impl Iterator<Item = &BoundGroup> {
        self.single.iter().chain(self.by_role.values())
    }

    /// True when the context was bound with roles.
    pub fn is_multi_device(&self) -> bool {
        !self.by_role.is_empty()
    }
}
