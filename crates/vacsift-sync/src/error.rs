use thiserror::Error;
use vacsift_storage::StoreError;

/// Failures that abort a pipeline run. Record-local problems never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("currency rate table unavailable: {0}")]
    RateTableUnavailable(String),

    #[error("geography catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("currency code {code} has no rate against base {base}; add it to the rate table or map it in currency_aliases")]
    UnknownCurrency { code: String, base: String },

    #[error("currency code {code} has unusable rate {rate}")]
    InvalidRate { code: String, rate: f64 },

    #[error("invalid pipeline settings: {0}")]
    InvalidSettings(String),

    #[error("record source failed: {0}")]
    Source(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_currency_names_the_code() {
        let err = PipelineError::UnknownCurrency {
            code: "XAU".into(),
            base: "USD".into(),
        };
        let text = err.to_string();
        assert!(text.contains("XAU"));
        assert!(text.contains("USD"));
    }
}
