use std::collections::HashSet;

use super::{Force, MigrateOptions, Migration, MigrationReport, load_migrations};
use crate::error::SqliteMiddlewareError;
use crate::params;
use crate::pool::ConfigAndPool;
use crate::results::CustomDbRow;

/// Quote an identifier for use in generated SQL.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn text_column(row: &CustomDbRow, column: &str) -> Result<String, SqliteMiddlewareError> {
    row.get(column)
        .and_then(|v| v.as_text())
        .map(str::to_owned)
        .ok_or_else(|| {
            SqliteMiddlewareError::ExecutionError(format!(
                "migrations table row has no text column {column}"
            ))
        })
}

fn migration_from_row(row: &CustomDbRow) -> Result<Migration, SqliteMiddlewareError> {
    let id = row
        .get("id")
        .and_then(|v| v.as_int().copied())
        .ok_or_else(|| {
            SqliteMiddlewareError::ExecutionError("migrations table row has no integer id".into())
        })?;
    Ok(Migration {
        id,
        name: text_column(row, "name")?,
        up: text_column(row, "up")?,
        down: text_column(row, "down")?,
    })
}

/// Whether an applied migration must be reverted.
fn needs_revert(
    applied_id: i64,
    file_ids: &HashSet<i64>,
    last_file_id: i64,
    force: Option<Force>,
) -> bool {
    if !file_ids.contains(&applied_id) {
        return true;
    }
    match force {
        Some(Force::Id(target)) => applied_id > target,
        Some(Force::Last) => applied_id == last_file_id,
        None => false,
    }
}

impl ConfigAndPool {
    /// Bring the schema up to date with the migration files in
    /// `options.migrations_path`.
    ///
    /// ```rust,no_run
    /// use sqlite_middleware::prelude::*;
    ///
    /// # async fn demo(cap: ConfigAndPool) -> Result<(), SqliteMiddlewareError> {
    /// let report = cap
    ///     .migrate(MigrateOptions::default().with_migrations_path("db/migrations"))
    ///     .await?;
    /// println!("applied {:?}", report.applied);
    /// # Ok(()) }
    /// ```
    ///
    /// # Errors
    /// Any error of [`load_migrations`], or of [`ConfigAndPool::migrate_with`].
    pub async fn migrate(
        &self,
        options: MigrateOptions,
    ) -> Result<MigrationReport, SqliteMiddlewareError> {
        let migrations = load_migrations(&options.migrations_path).await?;
        self.migrate_with(migrations, &options).await
    }

    /// Reconcile the migrations table against `migrations`.
    ///
    /// Applied migrations are reverted, newest first, while they have no
    /// counterpart in `migrations` or are above the forced target. Then every
    /// migration above the newest remaining one, up to the target, is applied
    /// in id order. Each revert or apply commits on its own; a failing step
    /// stops the run and leaves earlier steps in place.
    ///
    /// # Errors
    /// `NoMigrationFiles` for an empty set, `DuplicateMigrationId`, or
    /// `MigrationFailed` wrapping the error of the failing step.
    pub async fn migrate_with(
        &self,
        mut migrations: Vec<Migration>,
        options: &MigrateOptions,
    ) -> Result<MigrationReport, SqliteMiddlewareError> {
        migrations.sort_by_key(|m| m.id);
        let Some(last_file_id) = migrations.last().map(|m| m.id) else {
            return Err(SqliteMiddlewareError::NoMigrationFiles(
                options.migrations_path.clone(),
            ));
        };
        let mut file_ids = HashSet::with_capacity(migrations.len());
        for m in &migrations {
            if !file_ids.insert(m.id) {
                return Err(SqliteMiddlewareError::DuplicateMigrationId(m.id));
            }
        }

        let table = quote_ident(&options.table);
        self.exec(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id   INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                up   TEXT NOT NULL,
                down TEXT NOT NULL
            )"
        ))
        .await?;

        let rows = self
            .all(
                &format!("SELECT id, name, up, down FROM {table} ORDER BY id DESC"),
                (),
            )
            .await?;
        let applied = rows
            .iter()
            .map(migration_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = MigrationReport::default();
        let mut newest_kept = 0i64;
        for migration in applied {
            if !needs_revert(migration.id, &file_ids, last_file_id, options.force) {
                newest_kept = migration.id;
                break;
            }
            self.revert_one(&table, &migration).await?;
            report.reverted.push(migration.id);
        }

        let target = match options.force {
            Some(Force::Id(id)) => id,
            _ => last_file_id,
        };
        for migration in migrations
            .iter()
            .filter(|m| m.id > newest_kept && m.id <= target)
        {
            self.apply_one(&table, migration).await?;
            report.applied.push(migration.id);
        }

        tracing::debug!(
            reverted = report.reverted.len(),
            applied = report.applied.len(),
            "migrations up to date"
        );
        Ok(report)
    }

    async fn revert_one(
        &self,
        table: &str,
        migration: &Migration,
    ) -> Result<(), SqliteMiddlewareError> {
        tracing::info!(id = migration.id, name = %migration.name, "reverting migration");
        let delete = format!("DELETE FROM {table} WHERE id = ?1");
        let id = migration.id;
        self.transaction(|trx| async move {
            trx.exec(&migration.down).await?;
            trx.run(&delete, params![id]).await?;
            Ok(())
        })
        .await
        .map_err(|source| failed(migration, source))
    }

    async fn apply_one(
        &self,
        table: &str,
        migration: &Migration,
    ) -> Result<(), SqliteMiddlewareError> {
        tracing::info!(id = migration.id, name = %migration.name, "applying migration");
        let insert = format!("INSERT INTO {table} (id, name, up, down) VALUES (?1, ?2, ?3, ?4)");
        self.transaction(|trx| async move {
            trx.exec(&migration.up).await?;
            trx.run(
                &insert,
                params![
                    migration.id,
                    migration.name.as_str(),
                    migration.up.as_str(),
                    migration.down.as_str()
                ],
            )
            .await?;
            Ok(())
        })
        .await
        .map_err(|source| failed(migration, source))
    }
}

fn failed(migration: &Migration, source: SqliteMiddlewareError) -> SqliteMiddlewareError {
    SqliteMiddlewareError::MigrationFailed {
        id: migration.id,
        name: migration.name.clone(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_rules() {
        let files: HashSet<i64> = [1, 2, 3].into_iter().collect();
        assert!(needs_revert(4, &files, 3, None));
        assert!(!needs_revert(3, &files, 3, None));
        assert!(needs_revert(3, &files, 3, Some(Force::Last)));
        assert!(!needs_revert(2, &files, 3, Some(Force::Last)));
        assert!(needs_revert(2, &files, 3, Some(Force::Id(1))));
        assert!(!needs_revert(1, &files, 3, Some(Force::Id(1))));
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("migrations"), "\"migrations\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }
}
