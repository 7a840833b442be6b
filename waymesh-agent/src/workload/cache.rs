//! Userspace mirror of the last-seen workload and service records, plus
//! the relationship index locating the endpoint slot of each membership.

use std::collections::BTreeSet;

use waymesh_api::workload::{Service, Workload};

/// The relationship index is bijective: each half of an overwritten pair
/// is evicted when the other half moves, so an endpoint slot and its
/// occupant always agree.
#[derive(Default)]
pub struct ResourceCache {
    workloads: ahash::HashMap<String, Workload>,
    services: ahash::HashMap<String, Service>,
    /// (workload_id, service_id) -> backend_index
    by_member: ahash::HashMap<(u32, u32), u32>,
    /// (service_id, backend_index) -> workload_id
    by_slot: ahash::HashMap<(u32, u32), u32>,
}

impl ResourceCache {
    /// Stores `workload` and returns the membership diff against its
    /// previous record: `(deleted_services, new_services)`, both sorted.
    /// A first-seen workload returns all its services as new.
    pub fn add_or_update_workload(&mut self, workload: Workload) -> (Vec<String>, Vec<String>) {
        let new_set: BTreeSet<String> = workload.services.iter().cloned().collect();
        let previous = self.workloads.insert(workload.uid.clone(), workload);
        let old_set: BTreeSet<String> = previous
            .map(|prev| prev.services.into_iter().collect())
            .unwrap_or_default();

        let deleted = old_set.difference(&new_set).cloned().collect();
        let added = new_set.difference(&old_set).cloned().collect();
        (deleted, added)
    }

    pub fn get_workload_by_uid(&self, uid: &str) -> Option<&Workload> {
        self.workloads.get(uid)
    }

    pub fn delete_workload(&mut self, uid: &str) {
        self.workloads.remove(uid);
    }

    pub fn add_or_update_service(&mut self, service: Service) {
        self.services.insert(service.resource_name(), service);
    }

    pub fn get_service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    pub fn delete_service(&mut self, name: &str) {
        self.services.remove(name);
    }

    pub fn update_relationship(&mut self, workload_id: u32, service_id: u32, backend_index: u32) {
        if let Some(previous_occupant) = self
            .by_slot
            .insert((service_id, backend_index), workload_id)
        {
            if previous_occupant != workload_id {
                self.by_member.remove(&(previous_occupant, service_id));
            }
        }
        if let Some(previous_slot) = self
            .by_member
            .insert((workload_id, service_id), backend_index)
        {
            if previous_slot != backend_index {
                self.by_slot.remove(&(service_id, previous_slot));
            }
        }
    }

    /// Silent when the slot has no entry.
    pub fn delete_relationship(&mut self, service_id: u32, backend_index: u32) {
        if let Some(workload_id) = self.by_slot.remove(&(service_id, backend_index)) {
            if self.by_member.get(&(workload_id, service_id)) == Some(&backend_index) {
                self.by_member.remove(&(workload_id, service_id));
            }
        }
    }

    pub fn get_relationship(&self, workload_id: u32, service_id: u32) -> Option<u32> {
        self.by_member.get(&(workload_id, service_id)).copied()
    }
}
