use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::deadpool::Pool;

pub type PoolError = deadpool::managed::PoolError<diesel_async::pooled_connection::PoolError>;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, thiserror::Error)]
pub enum StoreConnectionError {
    #[error("Failed to build state-store connection pool: {0}")]
    PoolBuild(#[from] deadpool::managed::BuildError),
    #[error("Failed to establish initial state-store connection: {0}")]
    InitialConnection(#[from] PoolError),
}

/// Opens a connection pool against the state store, forcing one connection
/// up-front so an unreachable store fails the process at startup rather
/// than on the first job.
pub async fn establish_connection_pool(database_url: &str) -> Result<DbPool, StoreConnectionError> {
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(config).build()?;

    let _conn = pool.get().await?;

    Ok(pool)
}
