use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge, histogram};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbBackend,
    EntityTrait, QuerySelect, Select, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Establishes a connection pool to the database with custom configuration
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("Configuring database connection with: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("inventory_ledger_db.max_connections", config.max_connections as f64);

    info!(
        "Connecting to database with max_connections={}",
        config.max_connections
    );

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!("Database connection establishment failed: {}", e);
        ServiceError::db_error(e)
    })?;

    info!("Database connection pool established successfully");
    Ok(db_pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Runs database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    let start = Instant::now();

    let result = crate::migrator::Migrator::up(pool, None)
        .await
        .map_err(ServiceError::db_error);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!("Database migrations completed successfully in {:?}", elapsed),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    debug!("Checking database connection");
    let start = Instant::now();

    let result = pool.ping().await.map_err(ServiceError::db_error);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => {
            debug!("Database connection check successful in {:?}", elapsed);
            gauge!(
                "inventory_ledger_db.connection_latency",
                elapsed.as_millis() as f64
            );
        }
        Err(e) => {
            error!("Database connection check failed after {:?}: {}", elapsed, e);
            counter!("inventory_ledger_db.connection_failures", 1);
        }
    }

    result
}

/// SQLite admits one writer per database file, and a deferred transaction
/// that reads before it writes fails with `database is locked` when another
/// writer holds the lock. Units of work on SQLite queue on this guard instead.
static SQLITE_WRITER: OnceLock<Arc<Mutex<()>>> = OnceLock::new();

/// An open database transaction. Dropping it without [`UnitOfWork::commit`]
/// rolls it back.
pub struct UnitOfWork {
    txn: DatabaseTransaction,
    started: Instant,
    // Declared after `txn` so the rollback on drop runs before release.
    _writer: Option<OwnedMutexGuard<()>>,
}

impl UnitOfWork {
    pub fn conn(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// Commits the unit of work, recording its outcome.
    pub async fn commit(self) -> Result<(), ServiceError> {
        let UnitOfWork {
            txn,
            started,
            _writer,
        } = self;
        let result = txn.commit().await.map_err(ServiceError::db_error);
        histogram!("inventory_ledger_db.transaction.duration", started.elapsed());
        match &result {
            Ok(_) => counter!("inventory_ledger_db.transaction.committed", 1),
            Err(_) => counter!("inventory_ledger_db.transaction.failed", 1),
        }
        result
    }
}

/// Opens a unit of work. On SQLite this waits until no other unit of work
/// in the process is writing.
pub async fn begin(pool: &DbPool) -> Result<UnitOfWork, ServiceError> {
    let started = Instant::now();
    let writer = match pool.get_database_backend() {
        DbBackend::Sqlite => {
            let guard = SQLITE_WRITER.get_or_init(|| Arc::new(Mutex::new(())));
            Some(Arc::clone(guard).lock_owned().await)
        }
        _ => None,
    };
    histogram!("inventory_ledger_db.transaction.lock_wait", started.elapsed());
    counter!("inventory_ledger_db.transaction.started", 1);

    let txn = pool.begin().await.map_err(ServiceError::db_error)?;
    Ok(UnitOfWork {
        txn,
        started,
        _writer: writer,
    })
}

/// Adds `FOR UPDATE` to a select on backends that support row locks.
/// SQLite rejects the clause; [`begin`] serializes its writers instead.
pub fn for_update<E, C>(select: Select<E>, conn: &C) -> Select<E>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    match conn.get_database_backend() {
        DbBackend::Sqlite => select,
        _ => select.lock_exclusive(),
    }
}
