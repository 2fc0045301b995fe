use crate::fetch::FetchError;
use crate::sharepoint::UploadError;

/// Custom error type for the harvesting pipeline's shared components.
#[derive(Debug)]
pub enum Error {
    /// Caller supplied something that does not parse as a URL.
    InvalidUrl(url::ParseError),

    /// A fetch failed (either tier).
    Fetch(FetchError),

    /// Error calling the classification model.
    Llm(async_openai::error::OpenAIError),

    /// Internal error: prompt substitution failed.
    PromptCreationFailure(subst::Error),

    /// PDF text extraction failed.
    PdfText(String),

    /// Parts-list file could not be read or parsed.
    PartsList(String),

    /// Upload to the document store failed.
    Upload(UploadError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidUrl(err) => write!(f, "Not a valid URL: {}", err),
            Error::Fetch(err) => write!(f, "Fetch error: {}", err),
            Error::Llm(err) => write!(f, "Error calling classification model: {}", err),
            Error::PromptCreationFailure(err) => write!(f, "Failed to create prompt: {}", err),
            Error::PdfText(msg) => write!(f, "PDF text extraction failed: {}", msg),
            Error::PartsList(msg) => write!(f, "Parts-list error: {}", msg),
            Error::Upload(err) => write!(f, "Upload error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err)
    }
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        Error::Fetch(err)
    }
}

impl From<async_openai::error::OpenAIError> for Error {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        Error::Llm(err)
    }
}

impl From<subst::Error> for Error {
    fn from(err: subst::Error) -> Self {
        Error::PromptCreationFailure(err)
    }
}

impl From<UploadError> for Error {
    fn from(err: UploadError) -> Self {
        Error::Upload(err)
    }
}

/// Validates that the input string is a URL.
pub fn is_valid_url(url: &str) -> Result<url::Url, Error> {
    let valid_url = url::Url::parse(url)?;
    Ok(valid_url)
}
