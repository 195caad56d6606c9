//! In-memory store.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use cellmesh_reconcile::{
    Object, OwnerLink, Propagation, ResourceKind, Store, StoreError, StoreResult,
};
use serde_json::Value;
use uuid::Uuid;

/// Store operation, for call recording and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

impl Op {
    /// Returns true for operations that change stored state.
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Get)
    }
}

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

type Key = (ResourceKind, String, String);

struct Fault {
    op: Op,
    kind: Option<ResourceKind>,
    error: StoreError,
    /// `None` fails forever.
    remaining: Option<usize>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Object>,
    calls: Vec<Call>,
    faults: Vec<Fault>,
    next_version: u64,
}

impl Inner {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn record(&mut self, op: Op, kind: ResourceKind, namespace: &str, name: &str) -> StoreResult<()> {
        self.calls.push(Call {
            op,
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });

        let fault = self
            .faults
            .iter_mut()
            .find(|f| f.op == op && f.kind.is_none_or(|k| k == kind));
        let Some(fault) = fault else {
            return Ok(());
        };

        let error = fault.error.clone();
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        self.faults.retain(|f| f.remaining != Some(0));
        Err(error)
    }

    fn cascade(&mut self, owner: &OwnerLink) {
        let dependents: Vec<Key> = self
            .objects
            .iter()
            .filter(|(_, obj)| obj.is_owned_by(owner))
            .map(|(key, _)| key.clone())
            .collect();

        for key in dependents {
            if let Some(removed) = self.objects.remove(&key) {
                self.cascade(&removed.owner_link());
            }
        }
    }
}

/// In-memory store mimicking the cluster API's bookkeeping.
///
/// - `create` assigns a uid, generation 1 and a fresh resource version.
/// - `update` is conditional on the resource version, keeps status, and bumps
///   the generation only when the body changed.
/// - `update_status` is conditional and never bumps the generation.
/// - `delete` cascades to owned objects unless orphaning. An object holding
///   finalizers is only marked terminating until [`MemoryStore::finalize`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an object without recording a call. Fills in uid, generation
    /// and resource version when unset.
    pub fn insert(&self, mut object: Object) -> Object {
        let mut inner = self.lock();
        if object.meta.uid.is_empty() {
            object.meta.uid = Uuid::new_v4().to_string();
        }
        if object.meta.generation == 0 {
            object.meta.generation = 1;
        }
        object.meta.resource_version = inner.bump_version();
        inner.objects.insert(key_of(&object), object.clone());
        object
    }

    /// Current stored object.
    pub fn object(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<Object> {
        self.lock()
            .objects
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// All stored objects of a kind, in name order.
    pub fn objects_of(&self, kind: ResourceKind) -> Vec<Object> {
        self.lock()
            .objects
            .values()
            .filter(|o| o.kind == kind)
            .cloned()
            .collect()
    }

    /// Simulate an external edit. The generation is bumped if the body
    /// changed.
    pub fn edit<F>(&self, kind: ResourceKind, namespace: &str, name: &str, f: F) -> Option<Object>
    where
        F: FnOnce(&mut Object),
    {
        let mut inner = self.lock();
        let key = (kind, namespace.to_string(), name.to_string());
        let mut object = inner.objects.get(&key)?.clone();
        let before = object.body.clone();
        f(&mut object);
        if object.body != before {
            object.meta.generation += 1;
        }
        object.meta.resource_version = inner.bump_version();
        inner.objects.insert(key, object.clone());
        Some(object)
    }

    /// Simulate a status change written by another controller.
    pub fn set_status(&self, kind: ResourceKind, namespace: &str, name: &str, status: Value) -> Option<Object> {
        let mut inner = self.lock();
        let key = (kind, namespace.to_string(), name.to_string());
        let mut object = inner.objects.get(&key)?.clone();
        object.status = status;
        object.meta.resource_version = inner.bump_version();
        inner.objects.insert(key, object.clone());
        Some(object)
    }

    /// Simulate the finalizers of an object being released. A terminating
    /// object is then removed.
    pub fn finalize(&self, kind: ResourceKind, namespace: &str, name: &str) {
        let mut inner = self.lock();
        let key = (kind, namespace.to_string(), name.to_string());
        let Some(object) = inner.objects.get_mut(&key) else {
            return;
        };
        object.meta.finalizers.clear();
        if object.is_terminating() {
            if let Some(removed) = inner.objects.remove(&key) {
                inner.cascade(&removed.owner_link());
            }
        }
    }

    /// Recorded calls, oldest first.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Recorded calls of one operation.
    pub fn calls_of(&self, op: Op) -> Vec<Call> {
        self.lock().calls.iter().filter(|c| c.op == op).cloned().collect()
    }

    /// Number of recorded write calls.
    pub fn writes(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.op.is_write()).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Fail the next `op` (optionally only for `kind`) with `error`.
    pub fn fail_next(&self, op: Op, kind: Option<ResourceKind>, error: StoreError) {
        self.lock().faults.push(Fault {
            op,
            kind,
            error,
            remaining: Some(1),
        });
    }

    /// Fail every `op` (optionally only for `kind`) with `error`.
    pub fn fail_always(&self, op: Op, kind: Option<ResourceKind>, error: StoreError) {
        self.lock().faults.push(Fault {
            op,
            kind,
            error,
            remaining: None,
        });
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }
}

fn key_of(object: &Object) -> Key {
    (object.kind, object.meta.namespace.clone(), object.meta.name.clone())
}

fn not_found(kind: ResourceKind, namespace: &str, name: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn conflict(object: &Object, live: &Object) -> StoreError {
    StoreError::Conflict {
        kind: object.kind,
        namespace: object.meta.namespace.clone(),
        name: object.meta.name.clone(),
        message: format!(
            "resource version {} is stale, current is {}",
            object.meta.resource_version, live.meta.resource_version
        ),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> StoreResult<Option<Object>> {
        let mut inner = self.lock();
        inner.record(Op::Get, kind, namespace, name)?;
        Ok(inner
            .objects
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(&self, object: &Object) -> StoreResult<Object> {
        let mut inner = self.lock();
        inner.record(Op::Create, object.kind, object.namespace(), object.name())?;

        let key = key_of(object);
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: object.kind,
                namespace: object.meta.namespace.clone(),
                name: object.meta.name.clone(),
            });
        }

        let mut created = object.clone();
        created.meta.uid = Uuid::new_v4().to_string();
        created.meta.generation = 1;
        created.meta.resource_version = inner.bump_version();
        created.status = Value::Null;
        inner.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, object: &Object) -> StoreResult<Object> {
        let mut inner = self.lock();
        inner.record(Op::Update, object.kind, object.namespace(), object.name())?;

        let key = key_of(object);
        let Some(live) = inner.objects.get(&key).cloned() else {
            return Err(not_found(object.kind, object.namespace(), object.name()));
        };
        if live.meta.resource_version != object.meta.resource_version {
            return Err(conflict(object, &live));
        }

        let mut updated = object.clone();
        updated.meta.uid = live.meta.uid.clone();
        updated.status = live.status.clone();
        updated.meta.generation = if updated.body != live.body {
            live.meta.generation + 1
        } else {
            live.meta.generation
        };
        updated.meta.resource_version = inner.bump_version();
        inner.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn update_status(&self, object: &Object) -> StoreResult<Object> {
        let mut inner = self.lock();
        inner.record(Op::UpdateStatus, object.kind, object.namespace(), object.name())?;

        let key = key_of(object);
        let Some(live) = inner.objects.get(&key).cloned() else {
            return Err(not_found(object.kind, object.namespace(), object.name()));
        };
        if live.meta.resource_version != object.meta.resource_version {
            return Err(conflict(object, &live));
        }

        let mut updated = live;
        updated.status = object.status.clone();
        updated.meta.resource_version = inner.bump_version();
        inner.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        propagation: Propagation,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.record(Op::Delete, kind, namespace, name)?;

        let key = (kind, namespace.to_string(), name.to_string());
        let Some(live) = inner.objects.get(&key).cloned() else {
            return Err(not_found(kind, namespace, name));
        };
        if !live.meta.finalizers.is_empty() {
            if !live.is_terminating() {
                let mut terminating = live;
                terminating.meta.deletion_timestamp = Some(Utc::now());
                terminating.meta.resource_version = inner.bump_version();
                inner.objects.insert(key, terminating);
            }
            return Ok(());
        }

        inner.objects.remove(&key);
        if propagation != Propagation::Orphan {
            inner.cascade(&live.owner_link());
        }
        Ok(())
    }
}
