//! Owner/resource bookkeeping for diagnostics and profiling tools.
//!
//! Independent of the object cache and guarded by its own lock, so logging or profiler threads
//! can register and inspect resources while the command processor renders.

use std::sync::{Mutex, MutexGuard};

use hashbrown::HashMap;
use tracing::debug;

use crate::error::RegistryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerInfo {
    pub handle: OwnerHandle,
    pub name: String,
}

/// A named sub-allocation of an owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    pub handle: ResourceHandle,
    pub owner: OwnerHandle,
    pub memory: u64,
    pub size: u64,
    pub name: String,
    pub resource_type: u32,
    pub user_data: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_owner: u32,
    next_resource: u32,
    owners: HashMap<OwnerHandle, String>,
    resources: HashMap<ResourceHandle, ResourceInfo>,
}

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    state: Mutex<RegistryState>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn register_owner(&self, name: &str) -> OwnerHandle {
        let mut state = self.lock();
        state.next_owner += 1;
        let handle = OwnerHandle(state.next_owner);
        state.owners.insert(handle, name.to_owned());
        debug!(owner = handle.0, name, "registered GPU memory owner");
        handle
    }

    pub fn register_resource(
        &self,
        owner: OwnerHandle,
        memory: u64,
        size: u64,
        name: &str,
        resource_type: u32,
        user_data: u64,
    ) -> Result<ResourceHandle, RegistryError> {
        let mut state = self.lock();
        if !state.owners.contains_key(&owner) {
            return Err(RegistryError::UnknownOwner(owner));
        }
        state.next_resource += 1;
        let handle = ResourceHandle(state.next_resource);
        state.resources.insert(
            handle,
            ResourceInfo {
                handle,
                owner,
                memory,
                size,
                name: name.to_owned(),
                resource_type,
                user_data,
            },
        );
        debug!(
            owner = owner.0,
            resource = handle.0,
            memory = format_args!("0x{memory:x}"),
            size,
            name,
            resource_type,
            "registered GPU memory resource"
        );
        Ok(handle)
    }

    /// Drops every resource of `owner`, keeping the owner. Returns how many were removed.
    pub fn unregister_all_resources_for_owner(&self, owner: OwnerHandle) -> Result<usize, RegistryError> {
        let mut state = self.lock();
        if !state.owners.contains_key(&owner) {
            return Err(RegistryError::UnknownOwner(owner));
        }
        let before = state.resources.len();
        state.resources.retain(|_, r| r.owner != owner);
        Ok(before - state.resources.len())
    }

    /// Drops `owner` and everything registered under it.
    pub fn unregister_owner_and_resources(&self, owner: OwnerHandle) -> Result<usize, RegistryError> {
        let mut state = self.lock();
        if state.owners.remove(&owner).is_none() {
            return Err(RegistryError::UnknownOwner(owner));
        }
        let before = state.resources.len();
        state.resources.retain(|_, r| r.owner != owner);
        let removed = before - state.resources.len();
        debug!(owner = owner.0, removed, "unregistered GPU memory owner");
        Ok(removed)
    }

    pub fn unregister_resource(&self, resource: ResourceHandle) -> Result<(), RegistryError> {
        self.lock()
            .resources
            .remove(&resource)
            .map(|_| ())
            .ok_or(RegistryError::UnknownResource(resource))
    }

    pub fn owners(&self) -> Vec<OwnerInfo> {
        let mut owners: Vec<OwnerInfo> = self
            .lock()
            .owners
            .iter()
            .map(|(handle, name)| OwnerInfo {
                handle: *handle,
                name: name.clone(),
            })
            .collect();
        owners.sort_by_key(|o| o.handle);
        owners
    }

    pub fn resources(&self) -> Vec<ResourceInfo> {
        let mut resources: Vec<ResourceInfo> = self.lock().resources.values().cloned().collect();
        resources.sort_by_key(|r| r.handle);
        resources
    }

    pub fn resources_for_owner(&self, owner: OwnerHandle) -> Vec<ResourceInfo> {
        let mut resources: Vec<ResourceInfo> = self
            .lock()
            .resources
            .values()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect();
        resources.sort_by_key(|r| r.handle);
        resources
    }
}
