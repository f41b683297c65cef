use anyhow::{bail, Context, Result};
use log::debug;
use rusqlite::Connection;

/// Schema steps in order. `user_version` records how many have been applied.
const MIGRATIONS: &[(&str, &str)] = &[
    ("schema_v1.sql", include_str!("schemas/schema_v1.sql")),
    ("schema_v2.sql", include_str!("schemas/schema_v2.sql")),
];

pub fn schema_version() -> i64 {
    MIGRATIONS.len() as i64
}

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let applied: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;
    let target = schema_version();

    if applied > target {
        bail!("store schema v{applied} is newer than this build understands (v{target})");
    }
    if applied == target {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for (name, sql) in MIGRATIONS.iter().skip(applied.max(0) as usize) {
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply {name}"))?;
        debug!("Applied store migration {name}");
    }
    tx.pragma_update(None, "user_version", target)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}
