//! Integration tests for the resource cache using the in-memory collaborator
//!
//! These tests drive `ResourceModule`, `Resource` and `Draft` end to end and
//! use the collaborator's call counters to check how often the remote side
//! was actually asked.

use async_trait::async_trait;
use cloudtree::mock::{MemoryRemote, Operation, Record};
use cloudtree::{
    DraftState, Error, ModuleNode, Node, Page, Remote, ResourceEvent, ResourceId, ResourceKey,
    ResourceModule, Status,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn records(names: &[&str]) -> Vec<Record> {
    names.iter().map(|n| Record::new(n, Some("rg"))).collect()
}

fn module_with(remote: &Arc<MemoryRemote>, page_size: usize) -> Arc<ResourceModule<MemoryRemote>> {
    ResourceModule::root("things", "sub-1", "Test.Provider")
        .client(Arc::clone(remote))
        .page_size(page_size)
        .build()
        .expect("module should build")
}

/// Cache reads: get, list and pagination
mod read_tests {
    use super::*;

    /// Repeated gets return the same handle and hit the remote once
    #[tokio::test]
    async fn test_get_returns_stable_identity() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a"])));
        let module = module_with(&remote, 10);

        let first = module.get("a", Some("rg")).await.expect("a exists");
        let second = module.get("a", Some("rg")).await.expect("a exists");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(remote.calls().gets, 1);
        assert_eq!(
            first.id().to_string(),
            "/subscriptions/sub-1/resourceGroups/rg/providers/Test.Provider/things/a"
        );
        assert_eq!(first.status(), Status::Running);
        assert!(first.refreshed_at().is_some());
    }

    /// Lookups without a resource group match any group
    #[tokio::test]
    async fn test_get_without_resource_group() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a"])));
        let module = module_with(&remote, 10);
        module.list().await;

        let found = module.get("a", None).await.expect("a exists");
        assert_eq!(found.resource_group(), Some("rg"));
        assert_eq!(remote.calls().gets, 0);
    }

    /// Not-found is never cached
    #[tokio::test]
    async fn test_get_not_found_asks_again() {
        let remote = Arc::new(MemoryRemote::new());
        let module = module_with(&remote, 10);

        assert!(module.get("missing", Some("rg")).await.is_none());
        assert!(!module.exists("missing", Some("rg")).await);
        assert_eq!(remote.calls().gets, 2);
        assert!(module.cached().is_empty());
    }

    /// A transport failure on get degrades to None
    #[tokio::test]
    async fn test_get_failure_returns_none() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a"])));
        remote.fail(Operation::Get, "connection reset");
        let module = module_with(&remote, 10);

        assert!(module.get("a", Some("rg")).await.is_none());

        remote.recover(Operation::Get);
        assert!(module.get("a", Some("rg")).await.is_some());
    }

    /// Five items with page size 3: two pages, then everything is cached
    #[tokio::test]
    async fn test_list_walks_pages_once() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a", "b", "c", "d", "e"])));
        let module = module_with(&remote, 3);

        let listed = module.list().await;
        assert_eq!(listed.len(), 5);
        assert_eq!(remote.calls().list_pages, 2);
        assert!(module.is_loaded());

        let again = module.list().await;
        assert_eq!(again.len(), 5);
        assert_eq!(remote.calls().list_pages, 2);

        let names: Vec<&str> = again.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);

        assert!(module.get("c", Some("rg")).await.is_some());
        assert_eq!(remote.calls().gets, 0);
    }

    /// A listing reuses handles created earlier by get
    #[tokio::test]
    async fn test_list_keeps_existing_handles() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a", "b"])));
        let module = module_with(&remote, 10);

        let a = module.get("a", Some("rg")).await.expect("a exists");
        let listed = module.list().await;

        let listed_a = listed.iter().find(|r| r.name() == "a").expect("a listed");
        assert!(Arc::ptr_eq(&a, listed_a));
    }

    /// Concurrent listings share a single page walk
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_list_walks_once() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a", "b", "c", "d", "e"])));
        remote.delay(Operation::List, Duration::from_millis(50));
        let module = module_with(&remote, 3);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let module = Arc::clone(&module);
                tokio::spawn(async move { module.list().await.len() })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            assert_eq!(task.expect("task should not panic"), 5);
        }
        assert_eq!(remote.calls().list_pages, 2);
    }

    /// Concurrent gets for the same missing key share a single fetch
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_fetches_once() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a"])));
        remote.delay(Operation::Get, Duration::from_millis(50));
        let module = module_with(&remote, 10);

        let (x, y) = tokio::join!(module.get("a", Some("rg")), module.get("a", Some("rg")));
        assert!(Arc::ptr_eq(&x.expect("a exists"), &y.expect("a exists")));
        assert_eq!(remote.calls().gets, 1);
    }

    /// A module without a collaborator behaves as empty
    #[tokio::test]
    async fn test_no_client_degrades_to_empty() {
        let module: Arc<ResourceModule<MemoryRemote>> =
            ResourceModule::root("things", "sub-1", "Test.Provider")
                .build()
                .expect("module should build");

        assert!(module.client().is_none());
        assert!(module.list().await.is_empty());
        assert!(module.get("a", Some("rg")).await.is_none());

        let id = ResourceId::parse("/subscriptions/sub-1/providers/Test.Provider/things/a").unwrap();
        let err = assert_err!(module.delete(&id).await);
        assert!(matches!(err, Error::ClientUnavailable(_)));
    }

    /// Malformed scopes are rejected when the module is built
    #[test]
    fn test_builder_rejects_malformed_scope() {
        let result = ResourceModule::<MemoryRemote>::root("bad/name", "sub-1", "Test.Provider").build();
        assert!(matches!(result, Err(Error::MalformedId { .. })));

        let result = ResourceModule::<MemoryRemote>::root("things", "", "Test.Provider").build();
        assert!(matches!(result, Err(Error::MalformedId { .. })));
    }
}

/// Invalidation and reconciliation
mod refresh_tests {
    use super::*;

    /// After refresh the next listing re-walks and drops vanished entries
    #[tokio::test]
    async fn test_refresh_reconciles() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a", "b"])));
        let module = module_with(&remote, 10);

        let listed = module.list().await;
        let a = listed.iter().find(|r| r.name() == "a").cloned().expect("a listed");

        remote.remove("a", Some("rg"));
        remote.insert(Record::new("z", Some("rg")));

        // Nothing changes until the module is refreshed
        assert_eq!(module.list().await.len(), 2);

        module.refresh();
        assert!(!module.is_loaded());

        let names: Vec<String> = module.list().await.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["b", "z"]);
        assert!(a.is_deleted());
        assert_eq!(a.status(), Status::Deleted);
        assert_eq!(remote.calls().list_pages, 2);
    }

    /// A failed walk keeps what was cached and leaves the module unloaded
    #[tokio::test]
    async fn test_failed_walk_evicts_nothing() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a", "b"])));
        let module = module_with(&remote, 10);
        module.list().await;

        remote.remove("a", Some("rg"));
        remote.fail(Operation::List, "service unavailable");
        module.refresh();

        assert_eq!(module.list().await.len(), 2);
        assert!(!module.is_loaded());

        remote.recover(Operation::List);
        let listed = module.list().await;
        assert_eq!(listed.len(), 1);
        assert!(module.is_loaded());
    }

    /// Snapshot updates land on the existing handle
    #[tokio::test]
    async fn test_resource_refresh_updates_in_place() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a"])));
        let module = module_with(&remote, 10);
        let a = module.get("a", Some("rg")).await.expect("a exists");

        remote.set_state("a", Some("rg"), "Stopped");
        let refreshed = a.refresh().await;

        assert!(Arc::ptr_eq(&a, &refreshed));
        assert_eq!(a.status(), Status::Disconnected);
    }

    /// Refreshing a resource that vanished marks it deleted and evicts it
    #[tokio::test]
    async fn test_resource_refresh_not_found() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a"])));
        let module = module_with(&remote, 10);
        let a = module.get("a", Some("rg")).await.expect("a exists");

        remote.remove("a", Some("rg"));
        a.refresh().await;

        assert_eq!(a.status(), Status::Deleted);
        assert!(module.cached_get("a", Some("rg")).is_none());
    }

    /// Polling stops as soon as the status settles
    #[tokio::test]
    async fn test_wait_until_stable() {
        let remote = Arc::new(MemoryRemote::with_records([
            Record::new("a", Some("rg")).with_state("Updating")
        ]));
        let module = module_with(&remote, 10);
        let a = module.get("a", Some("rg")).await.expect("a exists");
        assert_eq!(a.status(), Status::Updating);

        // Still transitional after the polling budget is spent
        let status = a.wait_until_stable(Duration::from_millis(1), 2).await;
        assert_eq!(status, Status::Updating);
        assert_eq!(remote.calls().gets, 3);

        remote.set_state("a", Some("rg"), "Succeeded");
        let status = a.wait_until_stable(Duration::from_millis(1), 5).await;
        assert_eq!(status, Status::Running);
    }

    /// Repeated page tokens stop the walk without marking it complete
    #[tokio::test]
    async fn test_repeated_page_token_stops_walk() {
        struct Looping;

        #[async_trait]
        impl Remote for Looping {
            type Snapshot = String;
            type Config = ();

            async fn list_page(&self, _token: Option<&str>, _size: usize) -> anyhow::Result<Page<String>> {
                Ok(Page::more(vec!["x".to_string()], "same"))
            }

            async fn get_one(&self, _name: &str, _rg: Option<&str>) -> anyhow::Result<Option<String>> {
                Ok(None)
            }

            async fn delete_one(&self, _id: &ResourceId) -> anyhow::Result<()> {
                Ok(())
            }

            fn identity_of(&self, snapshot: &String) -> ResourceKey {
                ResourceKey::new(snapshot.clone(), None)
            }

            fn status_of(&self, _snapshot: &String) -> Status {
                Status::Running
            }
        }

        let module = ResourceModule::root("loops", "sub-1", "Test.Provider")
            .client(Arc::new(Looping))
            .build()
            .expect("module should build");

        let listed = module.list().await;
        assert_eq!(listed.len(), 1);
        assert!(!module.is_loaded());
    }
}

/// Delete and drafts
mod lifecycle_tests {
    use super::*;

    /// Status reads Deleting while the remote call is in flight
    #[tokio::test]
    async fn test_delete_marks_deleting_then_evicts() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a"])));
        remote.delay(Operation::Delete, Duration::from_millis(100));
        let module = module_with(&remote, 10);
        let a = module.get("a", Some("rg")).await.expect("a exists");

        let mut delete = Box::pin(a.delete());
        assert!(futures::poll!(&mut delete).is_pending());
        assert_eq!(a.status(), Status::Deleting);

        assert_ok!(delete.await);
        assert_eq!(a.status(), Status::Deleted);
        assert!(module.cached_get("a", Some("rg")).is_none());
        assert!(remote.record("a", Some("rg")).is_none());
    }

    /// A rejected delete restores the previous status and keeps the entry
    #[tokio::test]
    async fn test_delete_failure_reverts() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a"])));
        remote.fail(Operation::Delete, "Operation not permitted");
        let module = module_with(&remote, 10);
        let a = module.get("a", Some("rg")).await.expect("a exists");

        let err = assert_err!(module.delete(a.id()).await);
        assert!(matches!(err, Error::Remote(_)));
        assert_eq!(err.to_string(), "Operation not permitted");
        assert_eq!(a.status(), Status::Running);
        assert!(module.cached_get("a", Some("rg")).is_some());
    }

    /// Deleting something not cached still reaches the remote side
    #[tokio::test]
    async fn test_delete_uncached() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a"])));
        let module = module_with(&remote, 10);
        let id = ResourceId::subscription("sub-1")
            .and_then(|id| id.resource_group("rg"))
            .and_then(|id| id.provider("Test.Provider"))
            .and_then(|id| id.child("things", "a"))
            .unwrap();

        assert_ok!(module.delete(&id).await);
        assert!(remote.is_empty());
        assert_eq!(remote.calls().deletes, 1);
    }

    /// Nothing is cached until a create commits; a second commit is refused
    #[tokio::test]
    async fn test_create_commit() {
        let remote = Arc::new(MemoryRemote::new());
        let module = module_with(&remote, 10);

        let draft = module.create("t1", Some("rg"), json!({"sku": "small"}));
        assert!(draft.is_create());
        assert!(module.cached_get("t1", Some("rg")).is_none());

        let created = assert_ok!(draft.commit().await);
        assert_eq!(created.name(), "t1");
        assert_eq!(created.status(), Status::Running);
        assert!(Arc::ptr_eq(
            &created,
            &module.cached_get("t1", Some("rg")).expect("t1 cached")
        ));
        assert_eq!(
            remote.record("t1", Some("rg")).expect("t1 created").properties,
            json!({"sku": "small"})
        );

        let err = assert_err!(draft.commit().await);
        assert!(matches!(err, Error::AlreadyCommitted(_)));
        assert_eq!(remote.calls().creates, 1);
    }

    /// A rejected create leaves the cache untouched
    #[tokio::test]
    async fn test_create_failure_leaves_cache() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail(Operation::Create, "Quota exceeded");
        let module = module_with(&remote, 10);

        let draft = module.create("t1", Some("rg"), json!({}));
        let err = assert_err!(draft.commit().await);
        assert_eq!(err.to_string(), "Quota exceeded");
        assert!(module.cached().is_empty());

        assert!(matches!(draft.commit().await, Err(Error::AlreadyCommitted(_))));
        assert!(draft.set_config(json!({"x": 1})).is_err());
        assert_eq!(remote.calls().creates, 1);
    }

    /// Invalid names are rejected before any remote call
    #[tokio::test]
    async fn test_create_rejects_bad_name() {
        let remote = Arc::new(MemoryRemote::new());
        let module = module_with(&remote, 10);

        let draft = module.create("", Some("rg"), json!({}));
        assert!(matches!(draft.commit().await, Err(Error::MalformedId { .. })));
        assert_eq!(remote.calls().creates, 0);
    }

    /// Creates can finish while the remote side is still provisioning
    #[tokio::test]
    async fn test_create_then_wait() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_created_state("Provisioning");
        let module = module_with(&remote, 10);

        let created = assert_ok!(module.create("t1", Some("rg"), json!({})).commit().await);
        assert_eq!(created.status(), Status::Creating);

        remote.set_state("t1", Some("rg"), "Succeeded");
        let status = created.wait_until_stable(Duration::from_millis(1), 3).await;
        assert_eq!(status, Status::Running);
    }

    /// Updates apply to the existing handle
    #[tokio::test]
    async fn test_update_in_place() {
        let remote = Arc::new(MemoryRemote::with_records([
            Record::new("a", Some("rg")).with_properties(json!({"x": 1, "y": 2}))
        ]));
        let module = module_with(&remote, 10);
        let a = module.get("a", Some("rg")).await.expect("a exists");

        let draft = assert_ok!(a.update(json!({"y": 3})));
        assert!(draft.is_update());
        draft.stage(|config| config["z"] = json!(4)).unwrap();

        let updated = assert_ok!(draft.commit().await);
        assert!(Arc::ptr_eq(&a, &updated));
        assert_eq!(
            a.remote().expect("snapshot").properties,
            json!({"x": 1, "y": 3, "z": 4})
        );
        assert_eq!(a.status(), Status::Running);
    }

    /// update_or_create picks the draft kind from existence
    #[tokio::test]
    async fn test_update_or_create() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a"])));
        let module = module_with(&remote, 10);

        let existing = module.update_or_create("a", Some("rg"), json!({})).await;
        assert!(existing.is_update());

        let fresh = module.update_or_create("b", Some("rg"), json!({})).await;
        assert!(fresh.is_create());
        fresh.discard();

        assert!(remote.record("b", Some("rg")).is_none());
    }

    /// Cache changes are broadcast to subscribers
    #[tokio::test]
    async fn test_events() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a"])));
        let module = module_with(&remote, 10);
        let mut events = module.subscribe();

        let a = module.list().await.pop().expect("a listed");
        assert_ok!(a.delete().await);

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }

        assert!(received.contains(&ResourceEvent::Added(a.id().clone())));
        assert!(received.contains(&ResourceEvent::StatusChanged {
            id: a.id().clone(),
            from: Status::Running,
            to: Status::Deleting,
        }));
        assert!(received.contains(&ResourceEvent::Removed(a.id().clone())));
    }

    /// Overlapping deletes that both fail leave no Deleting behind
    #[tokio::test]
    async fn test_overlapping_failed_deletes_restore_status() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a"])));
        remote.delay(Operation::Delete, Duration::from_millis(50));
        remote.fail(Operation::Delete, "Locked");
        let module = module_with(&remote, 10);
        let a = module.get("a", Some("rg")).await.expect("a exists");

        let (first, second) = tokio::join!(module.delete(a.id()), module.delete(a.id()));
        assert_err!(first);
        assert_err!(second);

        assert_eq!(a.status(), Status::Running);
        assert_eq!(remote.calls().deletes, 2);
    }

    /// An update finishing mid-delete keeps Deleting; the failed delete then
    /// leaves the resource as the update left it
    #[tokio::test]
    async fn test_update_during_failed_delete() {
        let remote = Arc::new(MemoryRemote::with_records(records(&["a"])));
        remote.delay(Operation::Delete, Duration::from_millis(100));
        remote.fail(Operation::Delete, "Locked");
        let module = module_with(&remote, 10);
        let a = module.get("a", Some("rg")).await.expect("a exists");

        let mut delete = Box::pin(module.delete(a.id()));
        assert!(futures::poll!(&mut delete).is_pending());

        let draft = assert_ok!(a.update(json!({"tier": "gold"})));
        assert_ok!(draft.commit().await);
        assert_eq!(a.status(), Status::Deleting);

        let err = assert_err!(delete.await);
        assert_eq!(err.to_string(), "Locked");
        assert_eq!(a.status(), Status::Running);
        assert_eq!(
            a.remote().expect("snapshot").properties,
            json!({"tier": "gold"})
        );
    }

    /// A rejected update keeps the previous snapshot and status
    #[tokio::test]
    async fn test_update_failure_leaves_snapshot() {
        let remote = Arc::new(MemoryRemote::with_records([
            Record::new("a", Some("rg")).with_properties(json!({"x": 1}))
        ]));
        remote.fail(Operation::Update, "Conflict");
        let module = module_with(&remote, 10);
        let a = module.get("a", Some("rg")).await.expect("a exists");
        let before = a.remote().expect("snapshot");

        let draft = assert_ok!(a.update(json!({"x": 2})));
        let err = assert_err!(draft.commit().await);

        assert!(matches!(err, Error::Remote(_)));
        assert_eq!(err.to_string(), "Conflict");
        assert_eq!(draft.state(), DraftState::Failed);
        assert_eq!(a.remote().expect("snapshot"), before);
        assert_eq!(a.status(), Status::Running);

        assert!(matches!(draft.commit().await, Err(Error::AlreadyCommitted(_))));
        assert_eq!(remote.calls().updates, 1);
    }
}

/// Loads racing with evictions and abandoned callers
mod consistency_tests {
    use super::*;

    /// Serves pages read before a pause, like a slow response in transit
    struct LaggingLister {
        inner: MemoryRemote,
        lag: Duration,
    }

    #[async_trait]
    impl Remote for LaggingLister {
        type Snapshot = Record;
        type Config = Value;

        async fn list_page(&self, token: Option<&str>, size: usize) -> anyhow::Result<Page<Record>> {
            let page = self.inner.list_page(token, size).await?;
            tokio::time::sleep(self.lag).await;
            Ok(page)
        }

        async fn get_one(&self, name: &str, rg: Option<&str>) -> anyhow::Result<Option<Record>> {
            self.inner.get_one(name, rg).await
        }

        async fn delete_one(&self, id: &ResourceId) -> anyhow::Result<()> {
            self.inner.delete_one(id).await
        }

        fn identity_of(&self, snapshot: &Record) -> ResourceKey {
            self.inner.identity_of(snapshot)
        }

        fn status_of(&self, snapshot: &Record) -> Status {
            self.inner.status_of(snapshot)
        }
    }

    /// A get abandoned by its caller is not joined by the next get
    #[tokio::test]
    async fn test_abandoned_get_is_not_reused() {
        let remote = Arc::new(MemoryRemote::new());
        remote.delay(Operation::Get, Duration::from_millis(30));
        let module = module_with(&remote, 10);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), module.get("db1", Some("rg1"))).await;
        assert!(abandoned.is_err());

        // Let the orphaned fetch finish with a miss
        tokio::time::sleep(Duration::from_millis(60)).await;
        remote.insert(Record::new("db1", Some("rg1")));

        assert!(module.get("db1", Some("rg1")).await.is_some());
        assert_eq!(remote.calls().gets, 2);
    }

    /// A page read before a delete does not bring the deleted entry back
    #[tokio::test]
    async fn test_walk_does_not_resurrect_deleted() {
        let remote = Arc::new(LaggingLister {
            inner: MemoryRemote::with_records(records(&["a", "b"])),
            lag: Duration::from_millis(100),
        });
        let module = ResourceModule::root("things", "sub-1", "Test.Provider")
            .client(Arc::clone(&remote))
            .build()
            .expect("module should build");
        let a = module.get("a", Some("rg")).await.expect("a exists");

        let lister = {
            let module = Arc::clone(&module);
            tokio::spawn(async move { module.list().await })
        };
        // The walk has read its page and is still waiting on the response
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_ok!(a.delete().await);

        let listed = lister.await.expect("list task should not panic");
        let names: Vec<&str> = listed.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["b"]);
        assert!(module.cached_get("a", Some("rg")).is_none());
        assert_eq!(a.status(), Status::Deleted);
    }
}

/// Parent/child navigation across kinds
mod tree_tests {
    use super::*;

    fn servers(databases: Arc<MemoryRemote>) -> Arc<ResourceModule<MemoryRemote>> {
        let remote = Arc::new(MemoryRemote::with_records(records(&["srv-1"])));
        ResourceModule::root("servers", "sub-1", "Test.Sql")
            .client(remote)
            .sub_modules(move |server| {
                let child = ResourceModule::<MemoryRemote>::child("databases", server)
                    .client(Arc::clone(&databases))
                    .build()
                    .expect("child module should build");
                vec![child as Arc<dyn ModuleNode>]
            })
            .build()
            .expect("module should build")
    }

    /// Child modules extend the parent's id and inherit its resource group
    #[tokio::test]
    async fn test_child_module_ids() {
        let databases = Arc::new(MemoryRemote::with_records(records(&["db1", "db2"])));
        let module = servers(databases);
        let server = module.get("srv-1", Some("rg")).await.expect("server exists");

        let dbs = server
            .sub_module::<MemoryRemote>("databases")
            .expect("databases module");
        assert_eq!(dbs.parent_id(), Some(server.id()));

        let db1 = dbs.get("db1", None).await.expect("db1 exists");
        assert_eq!(db1.resource_group(), Some("rg"));
        assert_eq!(
            db1.id().to_string(),
            "/subscriptions/sub-1/resourceGroups/rg/providers/Test.Sql/servers/srv-1/databases/db1"
        );
        assert_eq!(db1.id().parent().unwrap(), *server.id());
        assert_eq!(db1.id().resource_type(), "Test.Sql/servers/databases");

        let parent = db1.parent().expect("parent alive");
        assert_eq!(parent.id(), server.id());
    }

    /// Sub-modules are built once and reachable through the erased tree
    #[tokio::test]
    async fn test_erased_navigation() {
        let databases = Arc::new(MemoryRemote::with_records(records(&["db1", "db2"])));
        let module = servers(databases);
        let server = module.get("srv-1", Some("rg")).await.expect("server exists");

        let first = server.sub_modules();
        let second = Node::sub_modules(server.as_ref());
        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first[0], &second[0]));

        let nodes = first[0].list_nodes().await;
        let names: Vec<&str> = nodes.iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["db1", "db2"]);
        assert!(nodes.iter().all(|n| n.sub_modules().is_empty()));

        assert!(server.sub_module::<MemoryRemote>("missing").is_none());
    }
}
