//! A small, forward-only migration runner.
//!
//! Every migration is an embedded SQL script; names and SHA-256 checksums
//! are persisted so that re-running the migrator against an already-current
//! database is a no-op, and so a failed migration leaves an auditable trail
//! instead of silently rolling back state.

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use r2d2_sqlite::rusqlite::params;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// A single named migration step, embedded at compile time with
/// `include_str!`. Ordering is the order of this slice: a lexicographic
/// sort over folder-creation-time collapses to plain declaration order
/// once scripts are compiled in.
pub struct Migration {
	pub name: &'static str,
	pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[Migration { name: "0001_init", sql: include_str!("../migrations/0001_init/up.sql") }];

fn checksum(sql: &str) -> String {
	let digest = Sha256::digest(sql.as_bytes());
	digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn now_millis() -> i64 {
	(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn ensure_migrations_table(conn: &PooledConnection<SqliteConnectionManager>) -> anyhow::Result<()> {
	conn.execute_batch(
		"CREATE TABLE IF NOT EXISTS _migrations (
			id TEXT PRIMARY KEY,
			checksum TEXT NOT NULL,
			migration_name TEXT NOT NULL,
			logs TEXT,
			started_at INTEGER NOT NULL,
			finished_at INTEGER,
			rolled_back_at INTEGER,
			applied_steps_count INTEGER NOT NULL DEFAULT 0
		);",
	)?;
	Ok(())
}

fn applied_migration_names(conn: &PooledConnection<SqliteConnectionManager>) -> anyhow::Result<Vec<String>> {
	let mut stmt = conn.prepare(
		"SELECT migration_name FROM _migrations
		 WHERE finished_at IS NOT NULL AND rolled_back_at IS NULL
		 ORDER BY finished_at ASC",
	)?;
	let names = stmt.query_map([], |row| row.get::<_, String>(0))?.collect::<Result<Vec<_>, _>>()?;
	Ok(names)
}

/// Apply every migration in `MIGRATIONS` not yet recorded as successfully
/// finished. Idempotent: running twice with no new migrations is a no-op.
pub fn run(conn: &PooledConnection<SqliteConnectionManager>) -> anyhow::Result<()> {
	ensure_migrations_table(conn)?;
	let applied = applied_migration_names(conn)?;

	for migration in MIGRATIONS {
		if applied.iter().any(|name| name == migration.name) {
			continue;
		}
		apply_one(conn, migration)?;
	}

	Ok(())
}

fn apply_one(conn: &PooledConnection<SqliteConnectionManager>, migration: &Migration) -> anyhow::Result<()> {
	let id = tilekeep_core::id::generate_id();
	let started_at = now_millis();

	conn.execute(
		"INSERT INTO _migrations (id, checksum, migration_name, started_at, applied_steps_count)
		 VALUES (?1, ?2, ?3, ?4, 0)",
		params![id, checksum(migration.sql), migration.name, started_at],
	)?;

	log::info!("applying migration '{}'", migration.name);

	match conn.execute_batch(migration.sql) {
		Ok(()) => {
			conn.execute(
				"UPDATE _migrations SET finished_at = ?1, applied_steps_count = 1 WHERE id = ?2",
				params![now_millis(), id],
			)?;
			Ok(())
		}
		Err(err) => {
			conn.execute(
				"UPDATE _migrations SET logs = ?1, rolled_back_at = ?2 WHERE id = ?3",
				params![err.to_string(), now_millis(), id],
			)?;
			anyhow::bail!("migration '{}' failed: {err}", migration.name);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use r2d2::Pool;

	fn memory_conn() -> PooledConnection<SqliteConnectionManager> {
		let manager = SqliteConnectionManager::memory();
		let pool = Pool::builder().max_size(1).build(manager).unwrap();
		pool.get().unwrap()
	}

	#[test]
	fn applies_all_migrations_once() {
		let conn = memory_conn();
		run(&conn).unwrap();

		let count: i64 = conn
			.query_row("SELECT COUNT(*) FROM _migrations WHERE finished_at IS NOT NULL", [], |r| r.get(0))
			.unwrap();
		assert_eq!(count, MIGRATIONS.len() as i64);

		let tileset_table_exists: i64 = conn
			.query_row(
				"SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='tilesets'",
				[],
				|r| r.get(0),
			)
			.unwrap();
		assert_eq!(tileset_table_exists, 1);
	}

	#[test]
	fn running_twice_is_idempotent() {
		let conn = memory_conn();
		run(&conn).unwrap();
		run(&conn).unwrap();

		let count: i64 = conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0)).unwrap();
		assert_eq!(count, MIGRATIONS.len() as i64);
	}
}
