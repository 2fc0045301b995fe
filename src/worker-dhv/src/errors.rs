use tokio::sync::AcquireError;

use core_dhv::crawl::CrawlError;
use data_model_dhv::store::StoreError;

#[derive(Debug)]
pub enum Error {
    RecordNotFound,
    Store(StoreError),
    Crawl(CrawlError),
    Core(core_dhv::Error),
    SemaphorePermitError(AcquireError),
    /// Zero PDFs discovered while at least one non-cancellation page error
    /// was observed; the crawl cannot be trusted as a true empty result.
    ZeroPdfsWithErrors(usize),
    Cancelled,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RecordNotFound => write!(f, "Record not found in store."),
            Self::Store(store_error) => write!(f, "State store error: {}", store_error),
            Self::Crawl(crawl_error) => write!(f, "Crawl failed: {}", crawl_error),
            Self::Core(core_error) => write!(f, "{}", core_error),
            Self::SemaphorePermitError(acquire_error) => {
                write!(f, "Failed to acquire semaphore permit: {}", acquire_error)
            }
            Self::ZeroPdfsWithErrors(errors) => write!(
                f,
                "No PDFs found and {} page fetch errors were observed",
                errors
            ),
            Self::Cancelled => write!(f, "Job cancelled"),
        }
    }
}

impl std::error::Error for Error {}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::RecordNotFound => Self::RecordNotFound,
            _ => Self::Store(error),
        }
    }
}

impl From<CrawlError> for Error {
    fn from(error: CrawlError) -> Self {
        match error {
            CrawlError::Cancelled => Self::Cancelled,
            _ => Self::Crawl(error),
        }
    }
}

impl From<core_dhv::Error> for Error {
    fn from(error: core_dhv::Error) -> Self {
        Self::Core(error)
    }
}

impl From<AcquireError> for Error {
    fn from(error: AcquireError) -> Self {
        Self::SemaphorePermitError(error)
    }
}
