//! StateStore — redb-backed resource store for Enrober.
//!
//! Provides the CRUD + label-selector list surface the reconciliation core
//! needs over namespaces, secrets, deployments, replica sets and pods. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).
//!
//! Each call is its own transaction: objects are consistent individually,
//! but there are no cross-object transactions. Callers that check an
//! invariant and then write (hostname uniqueness, selector uniqueness) race
//! with each other exactly as they would against a remote substrate.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Object store the reconciliation core runs against.
///
/// `create_*` fails with [`StateError::AlreadyExists`], `update_*` with
/// [`StateError::NotFound`]; `delete_*` reports whether the object existed.
/// Namespaced objects can only be written into an existing namespace, and
/// deleting a namespace removes everything inside it.
pub trait ResourceStore: Send + Sync {
    fn create_namespace(&self, ns: &Namespace) -> StateResult<()>;
    fn get_namespace(&self, name: &str) -> StateResult<Option<Namespace>>;
    fn list_namespaces(&self, selector: &LabelSelector) -> StateResult<Vec<Namespace>>;
    fn update_namespace(&self, ns: &Namespace) -> StateResult<()>;
    fn delete_namespace(&self, name: &str) -> StateResult<bool>;

    fn create_secret(&self, secret: &Secret) -> StateResult<()>;
    fn get_secret(&self, namespace: &str, name: &str) -> StateResult<Option<Secret>>;
    fn update_secret(&self, secret: &Secret) -> StateResult<()>;
    fn delete_secret(&self, namespace: &str, name: &str) -> StateResult<bool>;

    fn create_deployment(&self, dep: &Deployment) -> StateResult<()>;
    fn get_deployment(&self, namespace: &str, name: &str) -> StateResult<Option<Deployment>>;
    fn list_deployments(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> StateResult<Vec<Deployment>>;
    fn update_deployment(&self, dep: &Deployment) -> StateResult<()>;
    fn delete_deployment(&self, namespace: &str, name: &str) -> StateResult<bool>;

    fn put_replica_set(&self, rs: &ReplicaSet) -> StateResult<()>;
    fn list_replica_sets(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> StateResult<Vec<ReplicaSet>>;
    fn delete_replica_set(&self, namespace: &str, name: &str) -> StateResult<bool>;

    fn put_pod(&self, pod: &Pod) -> StateResult<()>;
    fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> StateResult<Vec<Pod>>;
    fn delete_pod(&self, namespace: &str, name: &str) -> StateResult<bool>;
}

/// How a write treats an existing value under the same key.
#[derive(Clone, Copy)]
enum WriteMode {
    Create,
    Update,
    Upsert,
}

/// Thread-safe resource store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "resource store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory resource store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NAMESPACES).map_err(map_err!(Table))?;
        for table in NAMESPACED {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic table access ──────────────────────────────────────

    fn write<T: Serialize>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        kind: &'static str,
        key: &str,
        value: &T,
        mode: WriteMode,
    ) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            let exists = table.get(key).map_err(map_err!(Read))?.is_some();
            match mode {
                WriteMode::Create if exists => return Err(StateError::already_exists(kind, key)),
                WriteMode::Update if !exists => return Err(StateError::not_found(kind, key)),
                _ => {}
            }
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, kind, "object stored");
        Ok(())
    }

    fn read<T: DeserializeOwned>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Scan a table, keeping entries whose key starts with `prefix` and
    /// whose labels satisfy `selector`.
    fn scan<T, F>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        prefix: &str,
        selector: &LabelSelector,
        labels: F,
    ) -> StateResult<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> &Labels,
    {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                continue;
            }
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if selector.matches(labels(&item)) {
                results.push(item);
            }
        }
        Ok(results)
    }

    fn remove(&self, table_def: TableDefinition<&str, &[u8]>, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "object deleted");
        Ok(existed)
    }

    fn require_namespace(&self, namespace: &str) -> StateResult<()> {
        match self.read::<Namespace>(NAMESPACES, namespace)? {
            Some(_) => Ok(()),
            None => Err(StateError::not_found("namespace", namespace)),
        }
    }

    fn write_namespaced<T: Namespaced + Serialize>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        obj: &T,
        mode: WriteMode,
    ) -> StateResult<()> {
        self.require_namespace(obj.namespace())?;
        self.write(table_def, T::KIND, &obj.table_key(), obj, mode)
    }
}

impl ResourceStore for StateStore {
    // ── Namespaces ────────────────────────────────────────────────

    fn create_namespace(&self, ns: &Namespace) -> StateResult<()> {
        let name = ns.metadata.name.as_str();
        self.write(NAMESPACES, "namespace", name, ns, WriteMode::Create)
    }

    fn get_namespace(&self, name: &str) -> StateResult<Option<Namespace>> {
        self.read(NAMESPACES, name)
    }

    fn list_namespaces(&self, selector: &LabelSelector) -> StateResult<Vec<Namespace>> {
        self.scan(NAMESPACES, "", selector, |ns: &Namespace| &ns.metadata.labels)
    }

    fn update_namespace(&self, ns: &Namespace) -> StateResult<()> {
        let name = ns.metadata.name.as_str();
        self.write(NAMESPACES, "namespace", name, ns, WriteMode::Update)
    }

    /// Removes the namespace and, in the same transaction, every object
    /// stored under it.
    fn delete_namespace(&self, name: &str) -> StateResult<bool> {
        let prefix = object_key(name, "");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        let mut cascaded = 0usize;
        {
            let mut namespaces = txn.open_table(NAMESPACES).map_err(map_err!(Table))?;
            existed = namespaces.remove(name).map_err(map_err!(Write))?.is_some();
            for table_def in NAMESPACED {
                let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
                let mut keys = Vec::new();
                for entry in table.iter().map_err(map_err!(Read))? {
                    let (key, _) = entry.map_err(map_err!(Read))?;
                    let key = key.value().to_string();
                    if key.starts_with(&prefix) {
                        keys.push(key);
                    }
                }
                for key in &keys {
                    table.remove(key.as_str()).map_err(map_err!(Write))?;
                }
                cascaded += keys.len();
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, existed, cascaded, "namespace deleted");
        Ok(existed)
    }

    // ── Secrets ───────────────────────────────────────────────────

    fn create_secret(&self, secret: &Secret) -> StateResult<()> {
        self.write_namespaced(SECRETS, secret, WriteMode::Create)
    }

    fn get_secret(&self, namespace: &str, name: &str) -> StateResult<Option<Secret>> {
        self.read(SECRETS, &object_key(namespace, name))
    }

    fn update_secret(&self, secret: &Secret) -> StateResult<()> {
        self.write_namespaced(SECRETS, secret, WriteMode::Update)
    }

    fn delete_secret(&self, namespace: &str, name: &str) -> StateResult<bool> {
        self.remove(SECRETS, &object_key(namespace, name))
    }

    // ── Deployments ───────────────────────────────────────────────

    fn create_deployment(&self, dep: &Deployment) -> StateResult<()> {
        self.write_namespaced(DEPLOYMENTS, dep, WriteMode::Create)
    }

    fn get_deployment(&self, namespace: &str, name: &str) -> StateResult<Option<Deployment>> {
        self.read(DEPLOYMENTS, &object_key(namespace, name))
    }

    fn list_deployments(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> StateResult<Vec<Deployment>> {
        self.scan(
            DEPLOYMENTS,
            &object_key(namespace, ""),
            selector,
            |d: &Deployment| &d.metadata.labels,
        )
    }

    fn update_deployment(&self, dep: &Deployment) -> StateResult<()> {
        self.write_namespaced(DEPLOYMENTS, dep, WriteMode::Update)
    }

    fn delete_deployment(&self, namespace: &str, name: &str) -> StateResult<bool> {
        self.remove(DEPLOYMENTS, &object_key(namespace, name))
    }

    // ── Replica sets ──────────────────────────────────────────────

    fn put_replica_set(&self, rs: &ReplicaSet) -> StateResult<()> {
        self.write_namespaced(REPLICA_SETS, rs, WriteMode::Upsert)
    }

    fn list_replica_sets(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> StateResult<Vec<ReplicaSet>> {
        self.scan(
            REPLICA_SETS,
            &object_key(namespace, ""),
            selector,
            |rs: &ReplicaSet| &rs.metadata.labels,
        )
    }

    fn delete_replica_set(&self, namespace: &str, name: &str) -> StateResult<bool> {
        self.remove(REPLICA_SETS, &object_key(namespace, name))
    }

    // ── Pods ──────────────────────────────────────────────────────

    fn put_pod(&self, pod: &Pod) -> StateResult<()> {
        self.write_namespaced(PODS, pod, WriteMode::Upsert)
    }

    fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> StateResult<Vec<Pod>> {
        self.scan(PODS, &object_key(namespace, ""), selector, |p: &Pod| {
            &p.metadata.labels
        })
    }

    fn delete_pod(&self, namespace: &str, name: &str) -> StateResult<bool> {
        self.remove(PODS, &object_key(namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_namespace(name: &str) -> Namespace {
        let mut meta = ObjectMeta::named(name);
        meta.labels.insert("organization".into(), "acme".into());
        meta.annotations
            .insert("hostNames".into(), "a.example.com".into());
        Namespace { metadata: meta }
    }

    fn test_deployment(ns: &str, name: &str, app: &str) -> Deployment {
        let mut meta = ObjectMeta::namespaced(ns, name);
        meta.labels.insert("app".into(), app.into());
        Deployment {
            metadata: meta.clone(),
            spec: DeploymentSpec {
                replicas: 1,
                selector: LabelSelector::single("app", app),
                template: PodTemplate {
                    metadata: ObjectMeta {
                        labels: meta.labels,
                        ..Default::default()
                    },
                    spec: PodSpec {
                        containers: vec![Container {
                            name: "web".into(),
                            image: Some("nginx:1".into()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    },
                },
            },
        }
    }

    fn labelled<F: FnOnce(ObjectMeta) -> T, T>(ns: &str, name: &str, app: &str, build: F) -> T {
        let mut meta = ObjectMeta::namespaced(ns, name);
        meta.labels.insert("app".into(), app.into());
        build(meta)
    }

    fn store_with_namespace(name: &str) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        store.create_namespace(&test_namespace(name)).unwrap();
        store
    }

    // ── Namespace CRUD ────────────────────────────────────────────

    #[test]
    fn namespace_create_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let ns = test_namespace("acme-prod");

        store.create_namespace(&ns).unwrap();
        assert_eq!(store.get_namespace("acme-prod").unwrap(), Some(ns));
    }

    #[test]
    fn namespace_create_twice_conflicts() {
        let store = store_with_namespace("acme-prod");
        let err = store
            .create_namespace(&test_namespace("acme-prod"))
            .unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists { .. }));
    }

    #[test]
    fn namespace_update_requires_existing() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .update_namespace(&test_namespace("missing"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn namespace_list_filters_by_label() {
        let store = store_with_namespace("acme-prod");
        store
            .create_namespace(&Namespace {
                metadata: ObjectMeta::named("kube-system"),
            })
            .unwrap();

        assert_eq!(
            store.list_namespaces(&LabelSelector::everything()).unwrap().len(),
            2
        );
        let owned = store
            .list_namespaces(&LabelSelector::single("organization", "acme"))
            .unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].metadata.name, "acme-prod");
    }

    #[test]
    fn namespace_delete_cascades_to_contents() {
        let store = store_with_namespace("acme-prod");
        store.create_namespace(&test_namespace("acme-test")).unwrap();
        store
            .create_deployment(&test_deployment("acme-prod", "web", "web"))
            .unwrap();
        store
            .create_deployment(&test_deployment("acme-test", "web", "web"))
            .unwrap();
        store
            .create_secret(&Secret {
                metadata: ObjectMeta::namespaced("acme-prod", "routing"),
                ..Default::default()
            })
            .unwrap();
        store
            .put_pod(&labelled("acme-prod", "web-1", "web", |metadata| Pod {
                metadata,
                logs: vec![],
            }))
            .unwrap();

        assert!(store.delete_namespace("acme-prod").unwrap());

        assert!(store.get_namespace("acme-prod").unwrap().is_none());
        assert!(store.get_secret("acme-prod", "routing").unwrap().is_none());
        assert!(store.get_deployment("acme-prod", "web").unwrap().is_none());
        assert!(store
            .list_pods("acme-prod", &LabelSelector::everything())
            .unwrap()
            .is_empty());
        // Sibling namespace untouched.
        assert!(store.get_deployment("acme-test", "web").unwrap().is_some());
    }

    #[test]
    fn recreated_namespace_starts_empty() {
        let store = store_with_namespace("acme-prod");
        store
            .create_deployment(&test_deployment("acme-prod", "web", "web"))
            .unwrap();
        for name in ["web-a", "web-b"] {
            store
                .put_replica_set(&labelled("acme-prod", name, "web", |metadata| ReplicaSet {
                    metadata,
                }))
                .unwrap();
        }

        assert!(store.delete_namespace("acme-prod").unwrap());
        store.create_namespace(&test_namespace("acme-prod")).unwrap();

        let all = LabelSelector::everything();
        assert!(store.list_deployments("acme-prod", &all).unwrap().is_empty());
        assert!(store.list_replica_sets("acme-prod", &all).unwrap().is_empty());
        assert!(store.list_pods("acme-prod", &all).unwrap().is_empty());
    }

    #[test]
    fn namespace_prefix_does_not_leak_into_sibling() {
        let store = store_with_namespace("acme-a");
        store.create_namespace(&test_namespace("acme-ab")).unwrap();
        store
            .create_deployment(&test_deployment("acme-ab", "web", "web"))
            .unwrap();

        assert!(store
            .list_deployments("acme-a", &LabelSelector::everything())
            .unwrap()
            .is_empty());
        store.delete_namespace("acme-a").unwrap();
        assert!(store.get_deployment("acme-ab", "web").unwrap().is_some());
    }

    // ── Secrets ───────────────────────────────────────────────────

    #[test]
    fn secret_requires_namespace() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .create_secret(&Secret {
                metadata: ObjectMeta::namespaced("nope", "routing"),
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn secret_update_in_place() {
        let store = store_with_namespace("acme-prod");
        let mut secret = Secret {
            metadata: ObjectMeta::namespaced("acme-prod", "routing"),
            ..Default::default()
        };
        secret.data.insert("public-api-key".into(), "p1".into());
        store.create_secret(&secret).unwrap();

        secret.data.insert("public-api-key".into(), "p2".into());
        store.update_secret(&secret).unwrap();

        let stored = store.get_secret("acme-prod", "routing").unwrap().unwrap();
        assert_eq!(stored.data["public-api-key"], "p2");
        assert_eq!(stored.secret_type, "Opaque");
    }

    // ── Deployments ───────────────────────────────────────────────

    #[test]
    fn deployment_create_get_delete() {
        let store = store_with_namespace("acme-prod");
        let dep = test_deployment("acme-prod", "web", "web");

        store.create_deployment(&dep).unwrap();
        assert_eq!(store.get_deployment("acme-prod", "web").unwrap(), Some(dep));

        assert!(store.delete_deployment("acme-prod", "web").unwrap());
        assert!(!store.delete_deployment("acme-prod", "web").unwrap());
    }

    #[test]
    fn deployment_list_by_selector() {
        let store = store_with_namespace("acme-prod");
        store
            .create_deployment(&test_deployment("acme-prod", "web", "web"))
            .unwrap();
        store
            .create_deployment(&test_deployment("acme-prod", "worker", "worker"))
            .unwrap();

        let web = store
            .list_deployments("acme-prod", &LabelSelector::single("app", "web"))
            .unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].metadata.name, "web");
        assert_eq!(
            store
                .list_deployments("acme-prod", &LabelSelector::everything())
                .unwrap()
                .len(),
            2
        );
    }

    // ── Replica sets & pods ───────────────────────────────────────

    #[test]
    fn replica_sets_and_pods_by_selector() {
        let store = store_with_namespace("acme-prod");
        for name in ["web-a", "web-b"] {
            store
                .put_replica_set(&labelled("acme-prod", name, "web", |metadata| ReplicaSet {
                    metadata,
                }))
                .unwrap();
        }
        store
            .put_replica_set(&labelled("acme-prod", "worker-a", "worker", |metadata| {
                ReplicaSet { metadata }
            }))
            .unwrap();

        let web = LabelSelector::single("app", "web");
        assert_eq!(store.list_replica_sets("acme-prod", &web).unwrap().len(), 2);
        assert!(store.delete_replica_set("acme-prod", "web-a").unwrap());
        assert_eq!(store.list_replica_sets("acme-prod", &web).unwrap().len(), 1);
        assert!(store.list_pods("acme-prod", &web).unwrap().is_empty());
    }

    // ── Persistence (on-disk) ─────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.create_namespace(&test_namespace("acme-prod")).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let ns = store.get_namespace("acme-prod").unwrap();
        assert!(ns.is_some());
        assert_eq!(
            ns.unwrap().metadata.annotations["hostNames"],
            "a.example.com"
        );
    }

    // ── Edge cases ────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        let all = LabelSelector::everything();

        assert!(store.list_namespaces(&all).unwrap().is_empty());
        assert!(store.list_deployments("any", &all).unwrap().is_empty());
        assert!(store.list_replica_sets("any", &all).unwrap().is_empty());
        assert!(store.list_pods("any", &all).unwrap().is_empty());
        assert!(!store.delete_namespace("nope").unwrap());
        assert!(!store.delete_deployment("any", "nope").unwrap());
        assert!(!store.delete_pod("any", "nope").unwrap());
        assert!(store.get_secret("any", "routing").unwrap().is_none());
    }
}
