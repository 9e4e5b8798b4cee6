//! Schema migrations.
//!
//! [`run_migrations`] drives a [`MigrationRunner`]: it reads the scripts,
//! holds the runner's lock, applies the pending batch, and rolls that batch
//! back when any script fails. [`SqliteMigrationRunner`] implements the runner
//! with `sqlx::migrate`, reading `<version>_<description>.up.sql` and
//! `.down.sql` scripts.

use std::path::{Path, PathBuf};

use sqlx::migrate::{Migrate, MigrateError, Migration, Migrator};
use sqlx::sqlite::SqliteConnection;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("could not read migrations from {}: {source}", directory.display())]
    Read {
        directory: PathBuf,
        #[source]
        source: MigrateError,
    },

    #[error("migration failed: {0}")]
    Execute(#[from] MigrateError),

    /// The batch failed and was rolled back.
    #[error("migrations were rolled back: {source}")]
    Apply {
        #[source]
        source: Box<MigrationError>,
    },

    /// The batch failed and so did its rollback.
    #[error("rollback failed ({rollback}) after a failed migration ({original})")]
    RollbackFailed {
        #[source]
        rollback: Box<MigrationError>,
        original: Box<MigrationError>,
    },

    #[error("{0}")]
    Runner(String),
}

/// Storage-specific half of a migration run.
pub trait MigrationRunner {
    type Migration: Clone;

    /// Load every migration script in `directory`.
    fn read_migrations(&mut self, directory: &Path) -> Result<Vec<Self::Migration>, MigrationError>;

    /// Migrations not applied yet, in application order.
    fn to_apply(&mut self, migrations: &[Self::Migration]) -> Result<Vec<Self::Migration>, MigrationError>;

    /// Migrations undoing the applied part of `batch`, in rollback order.
    fn to_rollback(&mut self, batch: &[Self::Migration]) -> Result<Vec<Self::Migration>, MigrationError>;

    fn apply_migrations(&mut self, batch: &[Self::Migration]) -> Result<(), MigrationError>;

    fn rollback_migrations(&mut self, batch: &[Self::Migration]) -> Result<(), MigrationError>;

    /// Keep other processes from migrating the same database.
    fn lock(&mut self) -> Result<(), MigrationError>;

    fn unlock(&mut self) -> Result<(), MigrationError>;
}

/// Apply the pending migrations in `directory`.
///
/// The runner stays locked for the whole batch and is unlocked on every path.
pub fn run_migrations<R>(runner: &mut R, directory: &Path) -> Result<(), MigrationError>
where
    R: MigrationRunner + ?Sized,
{
    let migrations = runner.read_migrations(directory)?;

    runner.lock()?;
    let outcome = apply_pending(runner, &migrations);
    let unlocked = runner.unlock();
    outcome?;
    unlocked?;

    debug!("Complete running database migrations");
    Ok(())
}

fn apply_pending<R>(runner: &mut R, migrations: &[R::Migration]) -> Result<(), MigrationError>
where
    R: MigrationRunner + ?Sized,
{
    let batch = runner.to_apply(migrations)?;
    if batch.is_empty() {
        debug!("No pending database migrations");
        return Ok(());
    }

    info!(count = batch.len(), "Applying database migrations");
    let Err(original) = runner.apply_migrations(&batch) else {
        return Ok(());
    };
    error!(error = %original, "Failed to apply database migrations, rolling back");

    let rolled_back = runner
        .to_rollback(&batch)
        .and_then(|rollback| runner.rollback_migrations(&rollback));

    match rolled_back {
        Ok(()) => Err(MigrationError::Apply {
            source: Box::new(original),
        }),
        Err(rollback) => {
            error!(error = %rollback, "Failed to roll back database migrations");
            Err(MigrationError::RollbackFailed {
                rollback: Box::new(rollback),
                original: Box::new(original),
            })
        }
    }
}

/// Runner over one SQLite connection.
pub struct SqliteMigrationRunner<'a> {
    runtime: &'a Runtime,
    conn: &'a mut SqliteConnection,
    migrations: Vec<Migration>,
}

impl<'a> SqliteMigrationRunner<'a> {
    pub fn new(runtime: &'a Runtime, conn: &'a mut SqliteConnection) -> Self {
        Self {
            runtime,
            conn,
            migrations: Vec::new(),
        }
    }

    fn applied_versions(&mut self) -> Result<Vec<i64>, MigrationError> {
        self.runtime.block_on(self.conn.ensure_migrations_table())?;
        if let Some(version) = self.runtime.block_on(self.conn.dirty_version())? {
            return Err(MigrateError::Dirty(version).into());
        }
        let applied = self.runtime.block_on(self.conn.list_applied_migrations())?;
        Ok(applied.into_iter().map(|m| m.version).collect())
    }
}

impl MigrationRunner for SqliteMigrationRunner<'_> {
    type Migration = Migration;

    fn read_migrations(&mut self, directory: &Path) -> Result<Vec<Migration>, MigrationError> {
        let migrator = self
            .runtime
            .block_on(Migrator::new(directory.to_path_buf()))
            .map_err(|source| MigrationError::Read {
                directory: directory.to_path_buf(),
                source,
            })?;

        self.migrations = migrator.iter().cloned().collect();
        debug!(count = self.migrations.len(), "Read migration scripts");
        Ok(self.migrations.clone())
    }

    fn to_apply(&mut self, migrations: &[Migration]) -> Result<Vec<Migration>, MigrationError> {
        let applied = self.applied_versions()?;
        let mut pending: Vec<Migration> = migrations
            .iter()
            .filter(|m| !m.migration_type.is_down_migration())
            .filter(|m| !applied.contains(&m.version))
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.version);
        Ok(pending)
    }

    fn to_rollback(&mut self, batch: &[Migration]) -> Result<Vec<Migration>, MigrationError> {
        let applied = self.applied_versions()?;
        let mut downs: Vec<Migration> = Vec::new();
        for up in batch.iter().filter(|m| applied.contains(&m.version)) {
            let down = self
                .migrations
                .iter()
                .find(|m| m.version == up.version && m.migration_type.is_down_migration())
                .ok_or_else(|| {
                    MigrationError::Runner(format!(
                        "migration {} has no down script to roll back with",
                        up.version
                    ))
                })?;
            downs.push(down.clone());
        }
        downs.sort_by_key(|m| std::cmp::Reverse(m.version));
        Ok(downs)
    }

    fn apply_migrations(&mut self, batch: &[Migration]) -> Result<(), MigrationError> {
        for migration in batch {
            let elapsed = self.runtime.block_on(self.conn.apply(migration))?;
            debug!(
                version = migration.version,
                description = %migration.description,
                elapsed_ms = elapsed.as_millis() as u64,
                "Applied migration"
            );
        }
        Ok(())
    }

    fn rollback_migrations(&mut self, batch: &[Migration]) -> Result<(), MigrationError> {
        for migration in batch {
            self.runtime.block_on(self.conn.revert(migration))?;
            debug!(version = migration.version, "Reverted migration");
        }
        Ok(())
    }

    fn lock(&mut self) -> Result<(), MigrationError> {
        self.runtime.block_on(self.conn.lock())?;
        Ok(())
    }

    fn unlock(&mut self) -> Result<(), MigrationError> {
        self.runtime.block_on(self.conn.unlock())?;
        Ok(())
    }
}
