use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use keel_core::TenantId;

/// Tenant-partitioned key/value store for disposable read models.
///
/// Every call names its tenant; there is no way to read across partitions
/// except [`tenants`](TenantStore::tenants), which only lists them.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn upsert(&self, tenant_id: TenantId, key: K, value: V);
    fn list(&self, tenant_id: TenantId) -> Vec<V>;
    /// Drop every record of a tenant before a rebuild.
    fn clear_tenant(&self, tenant_id: TenantId);
    fn tenants(&self) -> Vec<TenantId>;
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        (**self).clear_tenant(tenant_id)
    }

    fn tenants(&self) -> Vec<TenantId> {
        (**self).tenants()
    }
}

#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    inner: RwLock<HashMap<TenantId, HashMap<K, V>>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&tenant_id)?.get(key).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.entry(tenant_id).or_default().insert(key, value);
        }
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        let Ok(map) = self.inner.read() else {
            return vec![];
        };
        map.get(&tenant_id)
            .map(|partition| partition.values().cloned().collect())
            .unwrap_or_default()
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&tenant_id);
        }
    }

    fn tenants(&self) -> Vec<TenantId> {
        match self.inner.read() {
            Ok(map) => map
                .iter()
                .filter(|(_, partition)| !partition.is_empty())
                .map(|(t, _)| *t)
                .collect(),
            Err(_) => vec![],
        }
    }
}
