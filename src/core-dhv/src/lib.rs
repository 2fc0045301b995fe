pub mod browser;
pub mod classify;
pub mod common;
pub mod crawl;
pub mod errors;
pub mod fetch;
pub mod llms;
pub mod partslist;
pub mod pdftext;
pub mod sharepoint;

pub use common::health::{health_check, health_router, readiness_router};
pub use common::logging::{job_span, setup_logging};
pub use common::max_concurrency::get_max_concurrency;
pub use common::poll_interval::{TimeUnit, get_poll_interval, poll_interval};
pub use common::store_env::{get_db_pool, get_state_store_url};
pub use errors::{Error, is_valid_url};
