use rusqlite::Connection;

use crate::error::Result;

/// Initialise the object schema in `conn`.
///
/// One table holds every kind; the `(kind, namespace, name)` primary key is
/// what makes `create` fail on an existing object, and `resource_version`
/// is the compare-and-swap token for `update`. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS objects (
            kind              TEXT    NOT NULL,
            namespace         TEXT    NOT NULL,
            name              TEXT    NOT NULL,
            uid               TEXT    NOT NULL,
            resource_version  INTEGER NOT NULL,
            body              TEXT    NOT NULL,   -- JSON-encoded object
            created_at        TEXT    NOT NULL,
            updated_at        TEXT    NOT NULL,
            PRIMARY KEY (kind, namespace, name)
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// Connection settings shared by every handle onto the same database file.
///
/// Several stores (one per kind) plus the CLI may hold connections at once,
/// so writers wait on the lock instead of failing immediately.
pub fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(())
}
