//! The table synchronization engine. Consumes delta discovery responses,
//! diffs each resource against the cache, and performs the ordered table
//! edits that keep the packet-path view consistent: frontends cover every
//! routable address, endpoint slots stay dense, and every id resolves
//! back to a live resource.

use std::collections::{BTreeMap, BTreeSet};

use prost::Message;
use tracing::{debug, error, info, warn};

use waymesh_api::discovery::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, ADDRESS_TYPE, AUTHORIZATION_TYPE,
};
use waymesh_api::security::Authorization;
use waymesh_api::workload::{address, Address, NetworkMode, Service, Workload};
use waymesh_common::tables::{
    BackendKey, BackendValue, EndpointKey, EndpointValue, FrontendKey, FrontendValue, ServiceKey,
    ServiceValue,
};
use waymesh_common::{copy_ip_from_slice, port_to_be, MAX_PORT_NUM, MAX_SERVICE_NUM};

use crate::config::StartMode;
use crate::rbac::PolicyHandler;
use crate::tables::{TableMap, Tables};
use crate::workload::cache::ResourceCache;
use crate::workload::hashname::HashName;
use crate::workload::{LB_POLICY_RANDOM, WAYPOINT_TARGET_PORT};
use crate::{Error, Result};

/// Istiod marks the waypoint service itself by exposing its status port;
/// such a service must never be routed through its own waypoint.
const WAYPOINT_STATUS_PORT: u32 = 15021;

pub struct Processor<F, S, E, B>
where
    F: TableMap<Key = FrontendKey, Value = FrontendValue>,
    S: TableMap<Key = ServiceKey, Value = ServiceValue>,
    E: TableMap<Key = EndpointKey, Value = EndpointValue>,
    B: TableMap<Key = BackendKey, Value = BackendValue>,
{
    hash_name: HashName,
    /// Memberships waiting for their service's first appearance,
    /// service name -> workload uids.
    endpoints_by_service: BTreeMap<String, BTreeSet<String>>,
    tables: Tables<F, S, E, B>,
    cache: ResourceCache,
    node_id: String,
    reconcile_pending: bool,
}

impl<F, S, E, B> Processor<F, S, E, B>
where
    F: TableMap<Key = FrontendKey, Value = FrontendValue>,
    S: TableMap<Key = ServiceKey, Value = ServiceValue>,
    E: TableMap<Key = EndpointKey, Value = EndpointValue>,
    B: TableMap<Key = BackendKey, Value = BackendValue>,
{
    pub fn new(
        tables: Tables<F, S, E, B>,
        hash_name: HashName,
        node_id: String,
        start_mode: StartMode,
    ) -> Self {
        Self {
            hash_name,
            endpoints_by_service: BTreeMap::new(),
            tables,
            cache: ResourceCache::default(),
            node_id,
            reconcile_pending: start_mode == StartMode::Restart,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Applies one delta response and returns the acknowledgment for it.
    /// Per-resource failures are logged and never fail the ack.
    pub fn process_delta<P: PolicyHandler>(
        &mut self,
        response: &DeltaDiscoveryResponse,
        policies: &mut P,
    ) -> DeltaDiscoveryRequest {
        let ack = DeltaDiscoveryRequest::ack(response, &self.node_id);
        let outcome = match response.type_url.as_str() {
            ADDRESS_TYPE => self.handle_address_response(response),
            AUTHORIZATION_TYPE => self.handle_authorization_response(response, policies),
            other => Err(Error::UnsupportedTypeUrl(other.to_string())),
        };
        if let Err(err) = outcome {
            error!(%err, "delta response processing failed");
        }
        ack
    }

    fn handle_address_response(&mut self, response: &DeltaDiscoveryResponse) -> Result<()> {
        let mut last_err = None;
        for resource in &response.resources {
            let Some(any) = resource.resource.as_ref() else {
                continue;
            };
            let address = match Address::decode(any.value.as_slice()) {
                Ok(address) => address,
                Err(err) => {
                    warn!(name = %resource.name, %err, "skipping undecodable address resource");
                    continue;
                }
            };
            let outcome = match address.r#type {
                Some(address::Type::Workload(workload)) => self.handle_workload(workload),
                Some(address::Type::Service(service)) => self.handle_service(service),
                None => {
                    warn!(name = %resource.name, "address resource carries neither workload nor service");
                    Ok(())
                }
            };
            if let Err(err) = outcome {
                error!(name = %resource.name, %err, "failed to apply address resource");
                last_err = Some(err);
            }
        }

        self.handle_removed_addresses(&response.removed_resources);
        self.reconcile_after_restart();

        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn handle_authorization_response<P: PolicyHandler>(
        &mut self,
        response: &DeltaDiscoveryResponse,
        policies: &mut P,
    ) -> Result<()> {
        for resource in &response.resources {
            let Some(any) = resource.resource.as_ref() else {
                continue;
            };
            let policy = match Authorization::decode(any.value.as_slice()) {
                Ok(policy) => policy,
                Err(err) => {
                    warn!(name = %resource.name, %err, "skipping undecodable authorization resource");
                    continue;
                }
            };
            debug!(policy = %resource.name, "updating authorization policy");
            policies.update_policy(policy)?;
        }
        for name in &response.removed_resources {
            debug!(policy = %name, "removing authorization policy");
            policies.remove_policy(name);
        }
        Ok(())
    }

    fn handle_workload(&mut self, workload: Workload) -> Result<()> {
        debug!(uid = %workload.uid, "handling workload");
        let (deleted_services, new_services) = self.cache.add_or_update_workload(workload.clone());
        self.remove_stale_memberships(&workload, &deleted_services)?;
        self.add_new_memberships(&workload, &new_services)?;
        self.store_backend(&workload)
    }

    /// Purges the endpoint slots of services the workload is no longer a
    /// member of. The relationship index locates each slot; memberships
    /// without one are already gone.
    fn remove_stale_memberships(&mut self, workload: &Workload, services: &[String]) -> Result<()> {
        if services.is_empty() {
            return Ok(());
        }
        info!(uid = %workload.uid, ?services, "workload left services");
        let workload_id = self.hash_name.str_to_num(&workload.uid);
        let mut slots = Vec::new();
        for name in services {
            let service_id = self.hash_name.str_to_num(name);
            if let Some(backend_index) = self.cache.get_relationship(workload_id, service_id) {
                slots.push(EndpointKey {
                    service_id,
                    backend_index,
                });
            }
        }
        self.delete_endpoint_records(&slots)
    }

    fn add_new_memberships(&mut self, workload: &Workload, services: &[String]) -> Result<()> {
        if services.is_empty() {
            return Ok(());
        }
        info!(uid = %workload.uid, ?services, "workload joined services");
        let backend_uid = self.hash_name.str_to_num(&workload.uid);
        for name in services {
            let key = ServiceKey {
                service_id: self.hash_name.str_to_num(name),
            };
            match self.tables.service_lookup(&key)? {
                Some(value) => self.bind_endpoint(key, value, backend_uid)?,
                // the service has not arrived yet, park the membership
                None => self.buffer_membership(&workload.uid, name),
            }
        }
        Ok(())
    }

    /// Binds a backend to the next free slot of a live service.
    fn bind_endpoint(
        &mut self,
        key: ServiceKey,
        mut value: ServiceValue,
        backend_uid: u32,
    ) -> Result<()> {
        value.endpoint_count += 1;
        let slot = EndpointKey {
            service_id: key.service_id,
            backend_index: value.endpoint_count,
        };
        self.tables.endpoint_update(slot, EndpointValue { backend_uid })?;
        self.tables.service_update(key, value)?;
        self.cache
            .update_relationship(backend_uid, key.service_id, slot.backend_index);
        Ok(())
    }

    fn buffer_membership(&mut self, uid: &str, service_name: &str) {
        self.endpoints_by_service
            .entry(service_name.to_string())
            .or_default()
            .insert(uid.to_string());
    }

    fn store_backend(&mut self, workload: &Workload) -> Result<()> {
        let backend_uid = self.hash_name.str_to_num(&workload.uid);
        let mut value = BackendValue::default();

        if let Some(waypoint) = &workload.waypoint {
            if let Some(address) = &waypoint.address {
                copy_ip_from_slice(&mut value.waypoint_addr, &address.address);
            }
            value.waypoint_port = port_to_be(waypoint.hbone_mtls_port);
        }

        let mut names: Vec<&String> = workload.services.iter().collect();
        names.sort();
        names.dedup();
        for name in names {
            if value.service_count as usize >= MAX_SERVICE_NUM {
                warn!(uid = %workload.uid, "workload exceeds the service capacity of a backend row");
                break;
            }
            value.services[value.service_count as usize] = self.hash_name.str_to_num(name);
            value.service_count += 1;
        }

        let key = BackendKey { backend_uid };
        for ip in &workload.addresses {
            copy_ip_from_slice(&mut value.ip, ip);
            self.tables.backend_update(key, value)?;

            // host-network pods share the node address, which must keep
            // resolving to the node
            if workload.network_mode() != NetworkMode::HostNetwork {
                self.tables.frontend_update(
                    FrontendKey { ip: value.ip },
                    FrontendValue {
                        upstream_id: backend_uid,
                    },
                )?;
            }
        }
        Ok(())
    }

    fn handle_service(&mut self, mut service: Service) -> Result<()> {
        let name = service.resource_name();
        debug!(service = %name, "handling service");

        self.strip_self_referential_waypoint(&mut service);
        self.cache.add_or_update_service(service.clone());
        let service_id = self.hash_name.str_to_num(&name);

        self.store_service_frontends(service_id, &service)?;
        self.store_service(&name, service_id, &service)
    }

    /// A service routed through a waypoint at its own address, or the
    /// waypoint service itself, would loop in the packet path.
    fn strip_self_referential_waypoint(&self, service: &mut Service) {
        let Some(waypoint) = &service.waypoint else {
            return;
        };
        let waypoint_addr = waypoint.address.as_ref().map(|a| a.address.as_slice());
        let first_addr = service.addresses.first().map(|a| a.address.as_slice());
        let exposes_status_port = service
            .ports
            .iter()
            .any(|port| port.service_port == WAYPOINT_STATUS_PORT);
        if (waypoint_addr.is_some() && waypoint_addr == first_addr) || exposes_status_port {
            service.waypoint = None;
        }
    }

    fn store_service_frontends(&mut self, service_id: u32, service: &Service) -> Result<()> {
        for address in &service.addresses {
            let mut key = FrontendKey::default();
            copy_ip_from_slice(&mut key.ip, &address.address);
            self.tables.frontend_update(
                key,
                FrontendValue {
                    upstream_id: service_id,
                },
            )?;
        }
        Ok(())
    }

    fn store_service(&mut self, name: &str, service_id: u32, service: &Service) -> Result<()> {
        let key = ServiceKey { service_id };
        let mut value = ServiceValue {
            lb_policy: LB_POLICY_RANDOM,
            ..Default::default()
        };
        if let Some(waypoint) = &service.waypoint {
            if let Some(address) = &waypoint.address {
                copy_ip_from_slice(&mut value.waypoint_addr, &address.address);
            }
            value.waypoint_port = port_to_be(waypoint.hbone_mtls_port);
        }
        for (i, port) in service.ports.iter().enumerate() {
            if i >= MAX_PORT_NUM {
                warn!(service = %name, "service exceeds the port capacity of a service row");
                break;
            }
            value.service_port[i] = port_to_be(port.service_port);
            value.target_port[i] = if name.contains("waypoint") {
                port_to_be(WAYPOINT_TARGET_PORT)
            } else {
                port_to_be(port.target_port)
            };
        }

        match self.tables.service_lookup(&key)? {
            Some(existing) => {
                // endpoints churn with workload membership, not with
                // service definition updates
                value.endpoint_count = existing.endpoint_count;
            }
            None => {
                let buffered = self.endpoints_by_service.get(name).cloned();
                if let Some(buffered) = buffered {
                    value.endpoint_count = buffered.len() as u32;
                    for (offset, uid) in buffered.iter().enumerate() {
                        let slot = EndpointKey {
                            service_id,
                            backend_index: offset as u32 + 1,
                        };
                        let backend_uid = self.hash_name.str_to_num(uid);
                        self.tables
                            .endpoint_update(slot, EndpointValue { backend_uid })?;
                        self.cache
                            .update_relationship(backend_uid, service_id, slot.backend_index);
                    }
                    self.endpoints_by_service.remove(name);
                }
            }
        }

        self.tables.service_update(key, value)
    }

    fn handle_removed_addresses(&mut self, removed: &[String]) {
        let mut workloads = Vec::new();
        let mut services = Vec::new();
        for name in removed {
            // workloads are named <cluster>/<group>/<kind>/<namespace>/<name>,
            // services <namespace>/<hostname>
            if name.matches('/').count() > 2 {
                workloads.push(name.as_str());
            } else {
                services.push(name.as_str());
            }
        }
        for uid in workloads {
            if let Err(err) = self.remove_workload(uid) {
                error!(uid, %err, "failed to remove workload");
            }
        }
        for name in services {
            if let Err(err) = self.remove_service(name) {
                error!(service = name, %err, "failed to remove service");
            }
        }
    }

    fn remove_workload(&mut self, uid: &str) -> Result<()> {
        self.cache.delete_workload(uid);
        // a parked membership must not resurrect the backend when its
        // service finally arrives
        for members in self.endpoints_by_service.values_mut() {
            members.remove(uid);
        }
        self.endpoints_by_service
            .retain(|_, members| !members.is_empty());
        self.remove_workload_tables(uid)
    }

    fn remove_workload_tables(&mut self, uid: &str) -> Result<()> {
        let backend_uid = self.hash_name.str_to_num(uid);

        // pod addresses live in the frontend table too; drop the row the
        // backend record points at
        if let Some(backend) = self.tables.backend_lookup(&BackendKey { backend_uid })? {
            self.tables.frontend_delete(&FrontendKey { ip: backend.ip })?;
        }

        let slots = self.tables.endpoints_by_backend(backend_uid)?;
        if !slots.is_empty() {
            self.delete_endpoint_records(&slots)?;
        }

        self.tables.backend_delete(&BackendKey { backend_uid })?;
        self.hash_name.delete(uid);
        Ok(())
    }

    fn remove_service(&mut self, name: &str) -> Result<()> {
        self.cache.delete_service(name);
        self.remove_service_tables(name)
    }

    fn remove_service_tables(&mut self, name: &str) -> Result<()> {
        let service_id = self.hash_name.str_to_num(name);
        let key = ServiceKey { service_id };
        if let Some(value) = self.tables.service_lookup(&key)? {
            // the packet path must never chase a frontend into a missing
            // service row, so frontends go first
            for frontend in self.tables.frontends_by_upstream(service_id)? {
                self.tables.frontend_delete(&frontend)?;
            }
            self.tables.service_delete(&key)?;
            for backend_index in 1..=value.endpoint_count {
                self.tables.endpoint_delete(&EndpointKey {
                    service_id,
                    backend_index,
                })?;
                self.cache.delete_relationship(service_id, backend_index);
            }
        }
        self.hash_name.delete(name);
        Ok(())
    }

    /// Removes endpoint slots without leaving holes: the tail slot moves
    /// into each vacated position and the count shrinks by one.
    fn delete_endpoint_records(&mut self, slots: &[EndpointKey]) -> Result<()> {
        for &slot in slots {
            let service_key = ServiceKey {
                service_id: slot.service_id,
            };
            let Some(mut service_value) = self.tables.service_lookup(&service_key)? else {
                // service row already gone, drop the slot directly
                self.tables.endpoint_delete(&slot)?;
                self.cache
                    .delete_relationship(slot.service_id, slot.backend_index);
                continue;
            };

            let tail = EndpointKey {
                service_id: slot.service_id,
                backend_index: service_value.endpoint_count,
            };
            let Some(tail_value) = self.tables.endpoint_lookup(&tail)? else {
                // a missing tail means an earlier removal leaked; fall
                // back to a direct delete rather than leak further
                warn!(
                    service_id = slot.service_id,
                    backend_index = slot.backend_index,
                    "endpoint tail missing during compaction"
                );
                self.tables.endpoint_delete(&slot)?;
                self.cache
                    .delete_relationship(slot.service_id, slot.backend_index);
                continue;
            };

            self.tables.endpoint_update(slot, tail_value)?;
            self.cache
                .update_relationship(tail_value.backend_uid, slot.service_id, slot.backend_index);

            self.tables.endpoint_delete(&tail)?;
            self.cache
                .delete_relationship(tail.service_id, tail.backend_index);

            service_value.endpoint_count -= 1;
            self.tables.service_update(service_key, service_value)?;
        }
        Ok(())
    }

    /// After a restart the tables may hold entries from the previous
    /// epoch. Any hash-name entry without a live workload or service
    /// backing it is torn down, once, after the first address batch.
    fn reconcile_after_restart(&mut self) {
        if !self.reconcile_pending {
            return;
        }
        self.reconcile_pending = false;
        info!("reconciling tables against the previous epoch");

        for (name, id) in self.hash_name.entries() {
            if self.cache.get_workload_by_uid(&name).is_some()
                || self.cache.get_service(&name).is_some()
            {
                continue;
            }
            debug!(name = %name, id, "hash-name entry has no live resource");
            match self.tables.backend_lookup(&BackendKey { backend_uid: id }) {
                Ok(Some(_)) => {
                    if let Err(err) = self.remove_workload_tables(&name) {
                        error!(uid = %name, %err, "failed to remove stale workload");
                    }
                }
                Ok(None) => match self.tables.service_lookup(&ServiceKey { service_id: id }) {
                    Ok(Some(_)) => {
                        if let Err(err) = self.remove_service_tables(&name) {
                            error!(service = %name, %err, "failed to remove stale service");
                        }
                    }
                    Ok(None) => {}
                    Err(err) => error!(name = %name, %err, "service probe failed"),
                },
                Err(err) => error!(name = %name, %err, "backend probe failed"),
            }
        }
    }
}
