use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::migrator::Migrator;
use metrics::{counter, gauge, histogram};
use rand::Rng;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbBackend,
    DbErr, SqlErr, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

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

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl DbConfig {
    /// Single-connection in-memory SQLite pool. The database lives as long as
    /// the connection, so the pool must never drop below one.
    pub fn sqlite_in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(3600),
            ..Default::default()
        }
    }
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
///
/// # Errors
/// Returns a `ServiceError` if the connection cannot be established
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("Configuring database connection with: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());

    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("db.max_connections", config.max_connections as f64);

    info!(
        "Connecting to database with max_connections={}",
        config.max_connections
    );

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!("Database connection failed: {}", e);
        ServiceError::DatabaseError(e)
    })?;

    if db_pool.get_database_backend() == DbBackend::Sqlite && !is_in_memory(&config.url) {
        // Readers keep going while a writer holds the lock
        db_pool
            .execute_unprepared("PRAGMA journal_mode=WAL")
            .await
            .map_err(|e| {
                error!("Failed to enable WAL journal: {}", e);
                ServiceError::DatabaseError(e)
            })?;
        debug!("SQLite WAL journal enabled");
    }

    info!("Database connection pool established successfully");

    Ok(db_pool)
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Runs database migrations
///
/// # Errors
/// Returns a `ServiceError` if migrations fail to execute
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    let start = Instant::now();

    let result = Migrator::up(pool, None)
        .await
        .map_err(ServiceError::DatabaseError);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!(
            "Database migrations completed successfully in {:?}",
            elapsed
        ),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    debug!("Checking database connection");
    let start = Instant::now();

    let result = pool.ping().await.map_err(ServiceError::DatabaseError);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => {
            debug!("Database connection check successful in {:?}", elapsed);
            gauge!("db.connection_latency", elapsed.as_millis() as f64);
        }
        Err(e) => {
            error!(
                "Database connection check failed after {:?}: {}",
                elapsed, e
            );
            counter!("db.connection_failures", 1);
        }
    }

    result
}

/// True for errors raised because another transaction holds the rows we need:
/// SQLite busy/locked, Postgres serialization failure (40001) and deadlock (40P01),
/// and pool exhaustion.
pub fn is_contention_error(err: &DbErr) -> bool {
    if let DbErr::ConnectionAcquire(_) = err {
        return true;
    }

    let message = err.to_string().to_ascii_lowercase();

    [
        "database is locked",
        "database table is locked",
        "sqlite_busy",
        "40001",
        "40p01",
        "could not serialize access",
        "deadlock detected",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Opens a transaction that already holds the database write lock.
///
/// SQLite transactions start deferred: two of them that read first and then
/// write cannot both upgrade, and the loser fails without waiting. Touching a
/// table up front takes the write lock at `BEGIN` time instead, so competing
/// writers queue on the busy timeout. Postgres relies on row locks and begins
/// normally.
pub async fn begin_write(db: &DatabaseConnection) -> Result<DatabaseTransaction, ServiceError> {
    let txn = db.begin().await.map_err(ServiceError::db_error)?;
    if txn.get_database_backend() == DbBackend::Sqlite {
        if let Err(err) = txn
            .execute_unprepared("UPDATE products SET current_stock = current_stock WHERE 0 = 1")
            .await
        {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "Transaction rollback failed");
            }
            return Err(ServiceError::db_error(err));
        }
    }
    Ok(txn)
}

/// Linear backoff for the given attempt with up to one extra `backoff` of jitter
fn retry_delay(backoff: Duration, attempt: u32) -> Duration {
    let max_jitter = backoff.as_micros().min(u64::MAX as u128) as u64;
    let jitter = if max_jitter == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=max_jitter)
    };
    backoff * attempt + Duration::from_micros(jitter)
}

/// Commits on success and rolls back on failure, returning the original error.
pub async fn finish_transaction<T>(
    txn: DatabaseTransaction,
    result: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    match result {
        Ok(value) => {
            txn.commit().await.map_err(ServiceError::db_error)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "Transaction rollback failed");
            }
            Err(err)
        }
    }
}

/// Runs `f` until it succeeds or fails with a non-retryable error.
///
/// Each invocation must open and commit its own transaction. Retryable
/// failures back off linearly (`backoff * attempt`) plus a random jitter so
/// colliding callers spread out; once `attempts` is exhausted the last
/// conflict is returned as `ConcurrencyConflict`.
pub async fn with_retry<T, F, Fut>(
    operation: &'static str,
    attempts: u32,
    backoff: Duration,
    mut f: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let attempts = attempts.max(1);
    let start = Instant::now();
    let mut attempt = 1;

    loop {
        match f().await {
            Err(err) if err.is_retryable() && attempt < attempts => {
                counter!("db.transaction.retries", 1, "operation" => operation);
                warn!(
                    operation,
                    attempt,
                    error = %err,
                    "Retrying after lock contention"
                );
                tokio::time::sleep(retry_delay(backoff, attempt)).await;
                attempt += 1;
            }
            Err(ServiceError::ConcurrencyConflict(msg)) => {
                counter!("db.transaction.conflicts", 1, "operation" => operation);
                error!(operation, attempt, "Giving up after lock contention: {}", msg);
                return Err(ServiceError::ConcurrencyConflict(format!(
                    "{} failed after {} attempt(s): {}",
                    operation, attempt, msg
                )));
            }
            result => {
                histogram!("db.transaction.duration", start.elapsed(), "operation" => operation);
                return result;
            }
        }
    }
}
