use std::env::VarError;

use data_model_dhv::db::{DbPool, establish_connection_pool};

/// Uses the env var STATE_STORE_URL to establish a state-store connection pool.
/// WARNING: Panics if STATE_STORE_URL is not set or if the connection fails!
pub async fn get_db_pool() -> DbPool {
    let database_url =
        get_state_store_url().expect("STATE_STORE_URL must be set in .env file or present as an env var");
    match establish_connection_pool(&database_url).await {
        Ok(p) => p,
        Err(e) => panic!("Couldn't connect to the state store ({}): {}", database_url, e),
    }
}

/// Retrieves the value for the env var STATE_STORE_URL.
pub fn get_state_store_url() -> Result<String, VarError> {
    std::env::var("STATE_STORE_URL")
}
