use std::num::ParseIntError;

#[derive(Debug)]
pub enum MaxConcurrencyError {
    ParseIntError(ParseIntError),
    NonPositive,
}

impl std::error::Error for MaxConcurrencyError {}

impl From<ParseIntError> for MaxConcurrencyError {
    fn from(error: ParseIntError) -> Self {
        Self::ParseIntError(error)
    }
}

impl std::fmt::Display for MaxConcurrencyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParseIntError(e) => write!(f, "Not a valid number: {}", e),
            Self::NonPositive => write!(f, "Concurrency must be a positive number"),
        }
    }
}

/// Same as max_concurrency but panics on error.
pub fn get_max_concurrency(env_var_name: &str, default: u32) -> u32 {
    max_concurrency(env_var_name, default)
        .unwrap_or_else(|_| panic!("{} must be a valid positive number", env_var_name))
}

/// Retrieves the value of the environment variable as a concurrency limit.
pub fn max_concurrency(env_var_name: &str, default: u32) -> Result<u32, MaxConcurrencyError> {
    let max_concurrency = match std::env::var(env_var_name) {
        Ok(v) => v.trim().parse::<u32>()?,
        Err(_) => default,
    };

    if max_concurrency == 0 {
        return Err(MaxConcurrencyError::NonPositive);
    }

    Ok(max_concurrency)
}
