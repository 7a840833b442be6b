//! Typed wrappers over the four packet-path tables. Production maps are
//! pinned bpf hash maps opened from bpffs; tests run the same engine over
//! plain hash maps through the [`TableMap`] trait.

use std::borrow::BorrowMut;
use std::hash::Hash;
use std::io::ErrorKind;
use std::path::Path;

use aya::maps::{Map, MapData, MapError};
use aya::Pod;

use waymesh_common::tables::{
    BackendKey, BackendValue, EndpointKey, EndpointValue, FrontendKey, FrontendValue, ServiceKey,
    ServiceValue,
};

use crate::Result;

pub trait TableMap {
    type Key;
    type Value;

    /// Insert-or-replace. Never fails on pre-existence.
    fn update(&mut self, key: Self::Key, value: Self::Value) -> Result<()>;

    /// Removing an absent key is not an error.
    fn delete(&mut self, key: &Self::Key) -> Result<()>;

    /// Distinguishes absence (`Ok(None)`) from an underlying failure.
    fn lookup(&self, key: &Self::Key) -> Result<Option<Self::Value>>;

    fn entries(&self) -> Result<Vec<(Self::Key, Self::Value)>>;
}

impl<T: BorrowMut<MapData>, K: Pod + Eq + Hash, V: Pod> TableMap for aya::maps::HashMap<T, K, V> {
    type Key = K;
    type Value = V;

    fn update(&mut self, key: K, value: V) -> Result<()> {
        Ok(self.insert(key, value, 0)?)
    }

    fn delete(&mut self, key: &K) -> Result<()> {
        match self.remove(key) {
            Ok(()) => Ok(()),
            Err(MapError::KeyNotFound | MapError::ElementNotFound) => Ok(()),
            Err(MapError::SyscallError(ref call))
                if call.io_error.kind() == ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn lookup(&self, key: &K) -> Result<Option<V>> {
        match self.get(key, 0) {
            Ok(value) => Ok(Some(value)),
            Err(MapError::KeyNotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn entries(&self) -> Result<Vec<(K, V)>> {
        let mut rows = Vec::new();
        for kv in self.iter() {
            rows.push(kv?);
        }
        Ok(rows)
    }
}

impl<K: Clone + Eq + Hash, V: Clone> TableMap for ahash::HashMap<K, V> {
    type Key = K;
    type Value = V;

    fn update(&mut self, key: K, value: V) -> Result<()> {
        self.insert(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &K) -> Result<()> {
        self.remove(key);
        Ok(())
    }

    fn lookup(&self, key: &K) -> Result<Option<V>> {
        Ok(self.get(key).cloned())
    }

    fn entries(&self) -> Result<Vec<(K, V)>> {
        Ok(self.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

/// The four tables the packet path resolves a destination through.
pub struct Tables<F, S, E, B>
where
    F: TableMap<Key = FrontendKey, Value = FrontendValue>,
    S: TableMap<Key = ServiceKey, Value = ServiceValue>,
    E: TableMap<Key = EndpointKey, Value = EndpointValue>,
    B: TableMap<Key = BackendKey, Value = BackendValue>,
{
    frontend: F,
    service: S,
    endpoint: E,
    backend: B,
}

pub type PinnedTableMap<K, V> = aya::maps::HashMap<MapData, K, V>;

pub type PinnedTables = Tables<
    PinnedTableMap<FrontendKey, FrontendValue>,
    PinnedTableMap<ServiceKey, ServiceValue>,
    PinnedTableMap<EndpointKey, EndpointValue>,
    PinnedTableMap<BackendKey, BackendValue>,
>;

pub type MemTables = Tables<
    ahash::HashMap<FrontendKey, FrontendValue>,
    ahash::HashMap<ServiceKey, ServiceValue>,
    ahash::HashMap<EndpointKey, EndpointValue>,
    ahash::HashMap<BackendKey, BackendValue>,
>;

impl PinnedTables {
    /// Opens the four maps the packet-path loader pinned under `dir`.
    pub fn from_bpffs(dir: &Path) -> Result<Self> {
        Ok(Self {
            frontend: open_pinned(dir, "map_of_frontend")?,
            service: open_pinned(dir, "map_of_service")?,
            endpoint: open_pinned(dir, "map_of_endpoint")?,
            backend: open_pinned(dir, "map_of_backend")?,
        })
    }
}

impl MemTables {
    pub fn in_memory() -> Self {
        Self {
            frontend: ahash::HashMap::default(),
            service: ahash::HashMap::default(),
            endpoint: ahash::HashMap::default(),
            backend: ahash::HashMap::default(),
        }
    }
}

fn open_pinned<K: Pod + Eq + Hash, V: Pod>(dir: &Path, name: &str) -> Result<PinnedTableMap<K, V>> {
    let data = MapData::from_pin(dir.join(name))?;
    let map = Map::HashMap(data);
    Ok(map.try_into()?)
}

impl<F, S, E, B> Tables<F, S, E, B>
where
    F: TableMap<Key = FrontendKey, Value = FrontendValue>,
    S: TableMap<Key = ServiceKey, Value = ServiceValue>,
    E: TableMap<Key = EndpointKey, Value = EndpointValue>,
    B: TableMap<Key = BackendKey, Value = BackendValue>,
{
    pub fn frontend_update(&mut self, key: FrontendKey, value: FrontendValue) -> Result<()> {
        self.frontend.update(key, value)
    }

    pub fn frontend_delete(&mut self, key: &FrontendKey) -> Result<()> {
        self.frontend.delete(key)
    }

    pub fn frontend_lookup(&self, key: &FrontendKey) -> Result<Option<FrontendValue>> {
        self.frontend.lookup(key)
    }

    /// All frontend rows pointing at one upstream, used when a service is
    /// torn down.
    pub fn frontends_by_upstream(&self, upstream_id: u32) -> Result<Vec<FrontendKey>> {
        Ok(self
            .frontend
            .entries()?
            .into_iter()
            .filter(|(_, value)| value.upstream_id == upstream_id)
            .map(|(key, _)| key)
            .collect())
    }

    pub fn service_update(&mut self, key: ServiceKey, value: ServiceValue) -> Result<()> {
        self.service.update(key, value)
    }

    pub fn service_delete(&mut self, key: &ServiceKey) -> Result<()> {
        self.service.delete(key)
    }

    pub fn service_lookup(&self, key: &ServiceKey) -> Result<Option<ServiceValue>> {
        self.service.lookup(key)
    }

    pub fn endpoint_update(&mut self, key: EndpointKey, value: EndpointValue) -> Result<()> {
        self.endpoint.update(key, value)
    }

    pub fn endpoint_delete(&mut self, key: &EndpointKey) -> Result<()> {
        self.endpoint.delete(key)
    }

    pub fn endpoint_lookup(&self, key: &EndpointKey) -> Result<Option<EndpointValue>> {
        self.endpoint.lookup(key)
    }

    /// All endpoint slots bound to one backend, used when a workload is
    /// removed. Sorted so removals walk services in a stable order.
    pub fn endpoints_by_backend(&self, backend_uid: u32) -> Result<Vec<EndpointKey>> {
        let mut slots: Vec<EndpointKey> = self
            .endpoint
            .entries()?
            .into_iter()
            .filter(|(_, value)| value.backend_uid == backend_uid)
            .map(|(key, _)| key)
            .collect();
        slots.sort_by_key(|key| (key.service_id, key.backend_index));
        Ok(slots)
    }

    pub fn endpoint_entries(&self) -> Result<Vec<(EndpointKey, EndpointValue)>> {
        self.endpoint.entries()
    }

    pub fn backend_update(&mut self, key: BackendKey, value: BackendValue) -> Result<()> {
        self.backend.update(key, value)
    }

    pub fn backend_delete(&mut self, key: &BackendKey) -> Result<()> {
        self.backend.delete(key)
    }

    pub fn backend_lookup(&self, key: &BackendKey) -> Result<Option<BackendValue>> {
        self.backend.lookup(key)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_distinguishes_absent_from_present() -> crate::Result<()> {
        let mut tables = MemTables::in_memory();
        let key = ServiceKey { service_id: 7 };
        assert!(tables.service_lookup(&key)?.is_none());
        tables.service_update(
            key,
            ServiceValue {
                endpoint_count: 3,
                ..Default::default()
            },
        )?;
        assert_eq!(tables.service_lookup(&key)?.unwrap().endpoint_count, 3);
        Ok(())
    }

    #[test]
    fn delete_of_absent_key_is_ok() -> crate::Result<()> {
        let mut tables = MemTables::in_memory();
        tables.frontend_delete(&FrontendKey { ip: [1; 16] })?;
        Ok(())
    }

    #[test]
    fn predicate_scans_filter_by_value() -> crate::Result<()> {
        let mut tables = MemTables::in_memory();
        for (service_id, backend_index, backend_uid) in
            [(1, 1, 10), (1, 2, 11), (2, 1, 10), (3, 1, 12)]
        {
            tables.endpoint_update(
                EndpointKey {
                    service_id,
                    backend_index,
                },
                EndpointValue { backend_uid },
            )?;
        }
        let slots = tables.endpoints_by_backend(10)?;
        assert_eq!(
            slots,
            vec![
                EndpointKey {
                    service_id: 1,
                    backend_index: 1
                },
                EndpointKey {
                    service_id: 2,
                    backend_index: 1
                },
            ]
        );

        for (ip, upstream_id) in [([1u8; 16], 5), ([2; 16], 5), ([3; 16], 6)] {
            tables.frontend_update(FrontendKey { ip }, FrontendValue { upstream_id })?;
        }
        let mut fronts = tables.frontends_by_upstream(5)?;
        fronts.sort_by_key(|key| key.ip);
        assert_eq!(
            fronts,
            vec![FrontendKey { ip: [1; 16] }, FrontendKey { ip: [2; 16] }]
        );
        Ok(())
    }
}
