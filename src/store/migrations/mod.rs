//! Embedded, checksummed schema migrations
//!
//! Migrations live under `files/NNN_name/up.sql` and are compiled into the
//! binary. Applied versions are tracked in `schema_migrations` together with a
//! checksum of their SQL; editing an applied migration is an error.

use anyhow::{Context, Result};
use include_dir::{Dir, include_dir};
use log::{debug, info};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashSet};

static MIGRATIONS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/store/migrations/files");

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub up_sql: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub checksum: String,
}

/// Load all embedded migrations, ordered by version
pub fn load_migrations() -> Result<BTreeMap<i64, Migration>> {
    let mut migrations = BTreeMap::new();

    for entry in MIGRATIONS_DIR.dirs() {
        let dir_name = entry
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .context("Invalid migration directory name")?;

        let (version, name) = dir_name
            .split_once('_')
            .with_context(|| format!("Invalid migration directory format: {}. Expected NNN_name", dir_name))?;
        let version: i64 = version
            .parse()
            .with_context(|| format!("Invalid migration version in directory: {}", dir_name))?;

        let up_path = format!("{}/up.sql", dir_name);
        let up_sql = MIGRATIONS_DIR
            .get_file(&up_path)
            .with_context(|| format!("Missing up.sql in migration {}", dir_name))?
            .contents_utf8()
            .with_context(|| format!("up.sql is not valid UTF-8 in migration {}", dir_name))?
            .to_string();

        migrations.insert(
            version,
            Migration {
                version,
                name: name.to_string(),
                up_sql,
            },
        );
    }

    if migrations.is_empty() {
        anyhow::bail!("No migrations found in files directory");
    }

    Ok(migrations)
}

/// Checksum of migration SQL with line endings normalised
pub fn calculate_checksum(sql: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let normalized = sql.replace("\r\n", "\n").replace('\r', "\n");
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Applies pending migrations
pub struct MigrationManager<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MigrationManager<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                checksum TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool)
        .await
        .context("Failed to create schema_migrations table")?;
        Ok(())
    }

    pub async fn applied(&self) -> Result<Vec<AppliedMigration>> {
        self.init().await?;
        sqlx::query_as::<_, AppliedMigration>("SELECT version, name, checksum FROM schema_migrations ORDER BY version")
            .fetch_all(self.pool)
            .await
            .context("Failed to get applied migrations")
    }

    /// Fail if an applied migration is missing or was edited after being applied
    pub async fn validate(&self) -> Result<()> {
        let available = load_migrations()?;
        for applied in self.applied().await? {
            let migration = available.get(&applied.version).with_context(|| {
                format!(
                    "Applied migration {} '{}' not found in available migrations",
                    applied.version, applied.name
                )
            })?;
            let expected = calculate_checksum(&migration.up_sql);
            if applied.checksum != expected {
                anyhow::bail!(
                    "Migration {} checksum mismatch! Applied: {}, Expected: {}. \
                    The migration file has been modified after being applied.",
                    applied.version,
                    applied.checksum,
                    expected
                );
            }
        }
        Ok(())
    }

    pub async fn pending(&self) -> Result<Vec<Migration>> {
        let applied: HashSet<i64> = self.applied().await?.into_iter().map(|m| m.version).collect();
        Ok(load_migrations()?
            .into_values()
            .filter(|m| !applied.contains(&m.version))
            .collect())
    }

    /// Run all pending migrations
    pub async fn migrate_up(&self) -> Result<()> {
        self.validate().await?;

        let pending = self.pending().await?;
        if pending.is_empty() {
            debug!("No pending migrations");
            return Ok(());
        }

        info!("Running {} pending migrations", pending.len());
        for migration in pending {
            self.apply(&migration).await?;
        }
        Ok(())
    }

    async fn apply(&self, migration: &Migration) -> Result<()> {
        info!("Applying migration {} '{}'", migration.version, migration.name);

        let mut tx = self.pool.begin().await.context("Failed to start migration transaction")?;

        sqlx::raw_sql(&migration.up_sql)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute migration {} up SQL", migration.version))?;

        sqlx::query("INSERT INTO schema_migrations (version, name, checksum) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(&migration.name)
            .bind(calculate_checksum(&migration.up_sql))
            .execute(&mut *tx)
            .await
            .context("Failed to record migration")?;

        tx.commit().await.context("Failed to commit migration transaction")?;
        Ok(())
    }
}
