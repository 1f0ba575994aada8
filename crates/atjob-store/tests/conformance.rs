// Both backends must honour the same contract: the controller relies on
// AlreadyExists for idempotent creation and on Conflict for optimistic
// concurrency, regardless of where objects live.

use std::sync::Arc;

use atjob_core::{JobPhase, ObjectKey, Resource, ScheduledJob};
use atjob_store::{MemoryStore, ObjectStore, SqliteStore, StoreError, WatchEvent};

fn job(name: &str) -> ScheduledJob {
    ScheduledJob::new("default", name, "echo hi", "2030-01-01T00:00:00Z")
}

fn backends() -> Vec<(&'static str, Arc<dyn ObjectStore<ScheduledJob>>)> {
    let memory: Arc<dyn ObjectStore<ScheduledJob>> =
        Arc::new(MemoryStore::<ScheduledJob>::new());
    let sqlite: Arc<dyn ObjectStore<ScheduledJob>> =
        Arc::new(SqliteStore::<ScheduledJob>::open_in_memory().expect("open sqlite"));
    vec![("memory", memory), ("sqlite", sqlite)]
}

#[tokio::test]
async fn create_assigns_identity_and_version() {
    for (name, store) in backends() {
        let created = store.create(job("a")).await.unwrap();
        assert!(!created.meta.uid.is_empty(), "{name}: uid");
        assert_eq!(created.meta.resource_version, 1, "{name}: version");
        assert!(created.meta.created_at.is_some(), "{name}: created_at");

        let fetched = store.get(&created.key()).await.unwrap();
        assert_eq!(fetched, created, "{name}: get returns stored object");
    }
}

#[tokio::test]
async fn create_rejects_existing_key() {
    for (name, store) in backends() {
        store.create(job("a")).await.unwrap();
        let err = store.create(job("a")).await.unwrap_err();
        assert!(err.is_already_exists(), "{name}: got {err}");
    }
}

#[tokio::test]
async fn get_missing_is_not_found() {
    for (name, store) in backends() {
        let err = store.get(&ObjectKey::new("default", "nope")).await.unwrap_err();
        assert!(err.is_not_found(), "{name}: got {err}");
    }
}

#[tokio::test]
async fn update_bumps_version_and_keeps_uid() {
    for (name, store) in backends() {
        let created = store.create(job("a")).await.unwrap();
        let mut edited = created.clone();
        edited.status.phase = JobPhase::Running;
        // Callers cannot rewrite store-owned fields.
        edited.meta.uid = "forged".into();

        let updated = store.update(edited).await.unwrap();
        assert_eq!(updated.meta.resource_version, 2, "{name}");
        assert_eq!(updated.meta.uid, created.meta.uid, "{name}");
        assert_eq!(updated.status.phase, JobPhase::Running, "{name}");

        let fetched = store.get(&created.key()).await.unwrap();
        assert_eq!(fetched.meta.resource_version, 2, "{name}");
        assert_eq!(fetched.status.phase, JobPhase::Running, "{name}");
    }
}

#[tokio::test]
async fn stale_update_is_a_conflict() {
    for (name, store) in backends() {
        let created = store.create(job("a")).await.unwrap();

        let mut first = created.clone();
        first.status.phase = JobPhase::Running;
        store.update(first).await.unwrap();

        let mut stale = created.clone();
        stale.status.phase = JobPhase::Done;
        match store.update(stale).await.unwrap_err() {
            StoreError::Conflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 1, "{name}");
                assert_eq!(actual, 2, "{name}");
            }
            other => panic!("{name}: expected conflict, got {other}"),
        }

        let fetched = store.get(&created.key()).await.unwrap();
        assert_eq!(fetched.status.phase, JobPhase::Running, "{name}: loser must not win");
    }
}

#[tokio::test]
async fn update_of_deleted_object_is_not_found() {
    for (name, store) in backends() {
        let created = store.create(job("a")).await.unwrap();
        store.delete(&created.key()).await.unwrap();
        let err = store.update(created).await.unwrap_err();
        assert!(err.is_not_found(), "{name}: got {err}");
    }
}

#[tokio::test]
async fn list_is_ordered_by_key() {
    for (name, store) in backends() {
        store.create(job("b")).await.unwrap();
        store
            .create(ScheduledJob::new("alpha", "z", "true", "2030-01-01T00:00:00Z"))
            .await
            .unwrap();
        store.create(job("a")).await.unwrap();

        let keys: Vec<String> = store
            .list()
            .await
            .unwrap()
            .iter()
            .map(|j| j.key().to_string())
            .collect();
        assert_eq!(keys, ["alpha/z", "default/a", "default/b"], "{name}");
    }
}

#[tokio::test]
async fn watch_reports_every_change() {
    for (name, store) in backends() {
        let mut rx = store.watch();

        let created = store.create(job("a")).await.unwrap();
        let mut edited = created.clone();
        edited.status.phase = JobPhase::Running;
        store.update(edited).await.unwrap();
        store.delete(&created.key()).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), WatchEvent::Added(_)), "{name}");
        match rx.recv().await.unwrap() {
            WatchEvent::Modified(j) => assert_eq!(j.meta.resource_version, 2, "{name}"),
            other => panic!("{name}: expected Modified, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            WatchEvent::Deleted(j) => assert_eq!(j.key(), created.key(), "{name}"),
            other => panic!("{name}: expected Deleted, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn concurrent_creates_have_one_winner() {
    for (name, store) in backends() {
        let attempts = (0..16).map(|_| {
            let store = Arc::clone(&store);
            async move { store.create(job("race")).await }
        });
        let results = futures_util::future::join_all(attempts).await;

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let losers = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_already_exists()))
            .count();
        assert_eq!(winners, 1, "{name}");
        assert_eq!(losers, 15, "{name}");
    }
}
