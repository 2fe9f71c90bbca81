//! Roster schema migrations.
//!
//! # Responsibility
//! - Register schema steps for the guest, group, membership and change log
//!   tables in strictly increasing order.
//! - Bring a database up to the latest step and check that every roster
//!   table the steps promise is present afterwards.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - All pending migrations commit in one transaction or not at all.
//! - A database reporting the latest version but missing a roster table is
//!   refused instead of silently used.

use crate::db::{DbError, DbResult};
use log::{debug, info};
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
    /// Tables this step creates.
    tables: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "roster_entities",
        sql: include_str!("0001_init.sql"),
        tables: &["guests", "roster_groups", "roster_memberships"],
    },
    Migration {
        version: 2,
        name: "change_log",
        sql: include_str!("0002_change_log.sql"),
        tables: &["change_log"],
    },
];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Tables a fully migrated roster database holds.
pub fn roster_tables() -> impl Iterator<Item = &'static str> {
    MIGRATIONS
        .iter()
        .flat_map(|migration| migration.tables.iter().copied())
}

/// Migrates the roster schema to the latest version and verifies it.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the file was written by a newer build.
/// - `InvalidData` when a roster table is missing after migration.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let from = current_user_version(conn)?;
    let latest = latest_version();
    if from > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from,
            latest_supported: latest,
        });
    }

    if from < latest {
        let tx = conn.transaction()?;
        for migration in MIGRATIONS.iter().filter(|m| m.version > from) {
            tx.execute_batch(migration.sql)?;
            tx.pragma_update(None, "user_version", migration.version)?;
            debug!(
                "event=db_migrate module=db status=applied version={} name={}",
                migration.version, migration.name
            );
        }
        tx.commit()?;
        info!(
            "event=db_migrate module=db status=ok from_version={} to_version={}",
            from, latest
        );
    }

    verify_roster_tables(conn)
}

fn verify_roster_tables(conn: &Connection) -> DbResult<()> {
    let mut stmt =
        conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    for table in roster_tables() {
        if !stmt.exists([table])? {
            return Err(DbError::InvalidData(format!(
                "roster table `{table}` is missing at schema version {}",
                latest_version()
            )));
        }
    }
    Ok(())
}

fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
