pub mod health;
pub mod logging;
pub mod max_concurrency;
pub mod poll_interval;
pub mod store_env;
