use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use atjob_core::{ObjectKey, Resource};
use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use tokio::sync::broadcast;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    db::{configure, init_db},
    error::{Result, StoreError},
    store::{ObjectStore, WatchEvent, WATCH_CAPACITY},
};

/// Durable store for one resource kind, persisted as JSON rows in SQLite.
///
/// Wraps a single connection in a `Mutex`; open one store per kind, each
/// with its own connection onto the same file. Watch notifications only
/// cover writes made through this handle.
pub struct SqliteStore<T: Resource> {
    db: Mutex<Connection>,
    events: broadcast::Sender<WatchEvent<T>>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Resource> SqliteStore<T> {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        configure(&conn)?;
        init_db(&conn)?;
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Ok(Self {
            db: Mutex::new(conn),
            events,
            _kind: PhantomData,
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    fn notify(&self, event: WatchEvent<T>) {
        let _ = self.events.send(event);
    }

    fn not_found(key: &ObjectKey) -> StoreError {
        StoreError::NotFound {
            kind: T::KIND,
            key: key.clone(),
        }
    }
}

/// Decode a `(resource_version, body)` row, trusting the column for the version.
fn decode<T: Resource>(version: i64, body: &str) -> Result<T> {
    let mut obj: T = serde_json::from_str(body)?;
    obj.meta_mut().resource_version = version as u64;
    Ok(obj)
}

fn current_version(conn: &Connection, kind: &str, key: &ObjectKey) -> Result<Option<u64>> {
    let version = conn
        .query_row(
            "SELECT resource_version FROM objects
             WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
            rusqlite::params![kind, key.namespace, key.name],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(version.map(|v| v as u64))
}

#[async_trait]
impl<T: Resource> ObjectStore<T> for SqliteStore<T> {
    #[instrument(skip(self), fields(kind = T::KIND, key = %key))]
    async fn get(&self, key: &ObjectKey) -> Result<T> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT resource_version, body FROM objects
                 WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
                rusqlite::params![T::KIND, key.namespace, key.name],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        match row {
            Some((version, body)) => decode(version, &body),
            None => Err(Self::not_found(key)),
        }
    }

    async fn list(&self) -> Result<Vec<T>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT resource_version, body FROM objects
             WHERE kind = ?1 ORDER BY namespace, name",
        )?;
        let rows: Vec<(i64, String)> = stmt
            .query_map([T::KIND], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        rows.iter()
            .map(|(version, body)| decode(*version, body))
            .collect()
    }

    #[instrument(skip(self, obj), fields(kind = T::KIND, key = %obj.key()))]
    async fn create(&self, mut obj: T) -> Result<T> {
        let key = obj.key();
        let now = Utc::now();
        {
            let meta = obj.meta_mut();
            meta.uid = Uuid::new_v4().to_string();
            meta.resource_version = 1;
            meta.created_at = Some(now);
        }
        let body = serde_json::to_string(&obj)?;
        let now_str = now.to_rfc3339();

        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO objects
             (kind, namespace, name, uid, resource_version, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6)",
            rusqlite::params![
                T::KIND,
                key.namespace,
                key.name,
                obj.meta().uid,
                body,
                now_str
            ],
        );
        drop(conn);

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(StoreError::AlreadyExists { kind: T::KIND, key });
            }
            Err(e) => return Err(e.into()),
        }

        debug!("object created");
        self.notify(WatchEvent::Added(obj.clone()));
        Ok(obj)
    }

    #[instrument(skip(self, obj), fields(kind = T::KIND, key = %obj.key()))]
    async fn update(&self, mut obj: T) -> Result<T> {
        let key = obj.key();
        let expected = obj.meta().resource_version;

        let conn = self.conn()?;
        // uid and created_at are immutable: take them from the stored row.
        let stored: Option<(String, String)> = conn
            .query_row(
                "SELECT uid, body FROM objects
                 WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
                rusqlite::params![T::KIND, key.namespace, key.name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((uid, stored_body)) = stored else {
            return Err(Self::not_found(&key));
        };
        let previous: T = serde_json::from_str(&stored_body)?;
        {
            let meta = obj.meta_mut();
            meta.uid = uid;
            meta.created_at = previous.meta().created_at;
            meta.resource_version = expected + 1;
        }
        let body = serde_json::to_string(&obj)?;
        let (next_version, expected_version) = ((expected + 1) as i64, expected as i64);

        let n = conn.execute(
            "UPDATE objects SET resource_version = ?1, body = ?2, updated_at = ?3
             WHERE kind = ?4 AND namespace = ?5 AND name = ?6 AND resource_version = ?7",
            rusqlite::params![
                next_version,
                body,
                Utc::now().to_rfc3339(),
                T::KIND,
                key.namespace,
                key.name,
                expected_version
            ],
        )?;
        if n == 0 {
            return match current_version(&conn, T::KIND, &key)? {
                Some(actual) => Err(StoreError::Conflict {
                    kind: T::KIND,
                    key,
                    expected,
                    actual,
                }),
                None => Err(Self::not_found(&key)),
            };
        }
        drop(conn);

        debug!(version = expected + 1, "object updated");
        self.notify(WatchEvent::Modified(obj.clone()));
        Ok(obj)
    }

    #[instrument(skip(self), fields(kind = T::KIND, key = %key))]
    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let row: Option<(i64, String)> = tx
            .query_row(
                "SELECT resource_version, body FROM objects
                 WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
                rusqlite::params![T::KIND, key.namespace, key.name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((version, body)) = row else {
            return Err(Self::not_found(key));
        };
        tx.execute(
            "DELETE FROM objects WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
            rusqlite::params![T::KIND, key.namespace, key.name],
        )?;
        tx.commit()?;
        drop(conn);

        let removed: T = decode(version, &body)?;
        debug!("object deleted");
        self.notify(WatchEvent::Deleted(removed));
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>> {
        self.events.subscribe()
    }
}
