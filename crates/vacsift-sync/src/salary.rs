//! Salary gap filling and conversion into the base currency.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vacsift_core::CurrencyRateTable;

use crate::error::PipelineError;

pub const DEFAULT_GAP_FILL_RATIO: f64 = 0.43;

fn default_base_currency() -> String {
    "USD".to_string()
}

fn default_gap_fill_ratio() -> f64 {
    DEFAULT_GAP_FILL_RATIO
}

fn default_currency_aliases() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("RUR".to_string(), "RUB".to_string()),
        ("BYR".to_string(), "BYN".to_string()),
    ])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationSettings {
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    /// Assumed spread between the bounds when only one is published.
    #[serde(default = "default_gap_fill_ratio")]
    pub gap_fill_ratio: f64,
    /// Legacy or source-specific codes mapped to the code the rate table uses.
    #[serde(default = "default_currency_aliases")]
    pub currency_aliases: BTreeMap<String, String>,
}

impl Default for NormalizationSettings {
    fn default() -> Self {
        Self {
            base_currency: default_base_currency(),
            gap_fill_ratio: default_gap_fill_ratio(),
            currency_aliases: default_currency_aliases(),
        }
    }
}

/// Whole base-currency bounds. Either both are known or neither is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizedSalary {
    lower: Option<i64>,
    upper: Option<i64>,
}

impl NormalizedSalary {
    pub fn lower(&self) -> Option<i64> {
        self.lower
    }

    pub fn upper(&self) -> Option<i64> {
        self.upper
    }

    pub fn is_known(&self) -> bool {
        self.lower.is_some()
    }
}

/// Complete a one-sided range: `upper = lower * (1 + ratio)` or `lower = upper / (1 + ratio)`.
pub fn fill_gap(lower: Option<f64>, upper: Option<f64>, ratio: f64) -> (Option<f64>, Option<f64>) {
    match (lower, upper) {
        (Some(lower), None) => (Some(lower), Some(lower * (1.0 + ratio))),
        (None, Some(upper)) => (Some(upper / (1.0 + ratio)), Some(upper)),
        other => other,
    }
}

pub struct SalaryNormalizer<'a> {
    rates: &'a CurrencyRateTable,
    settings: &'a NormalizationSettings,
}

impl<'a> SalaryNormalizer<'a> {
    pub fn new(
        rates: &'a CurrencyRateTable,
        settings: &'a NormalizationSettings,
    ) -> Result<Self, PipelineError> {
        if !rates.is_base(&settings.base_currency) {
            return Err(PipelineError::RateTableUnavailable(format!(
                "rate table is based on {}, expected {}",
                rates.base, settings.base_currency
            )));
        }
        if !settings.gap_fill_ratio.is_finite() || settings.gap_fill_ratio <= -1.0 {
            return Err(PipelineError::InvalidSettings(format!(
                "gap_fill_ratio {} must be a finite number above -1",
                settings.gap_fill_ratio
            )));
        }
        Ok(Self { rates, settings })
    }

    pub fn canonical_code(&self, code: &str) -> String {
        let code = code.trim().to_ascii_uppercase();
        self.settings
            .currency_aliases
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(&code))
            .map(|(_, target)| target.to_ascii_uppercase())
            .unwrap_or(code)
    }

    /// Divisor for `code`; `None` means the amount is already in the base currency.
    pub fn rate_for(&self, code: Option<&str>) -> Result<Option<f64>, PipelineError> {
        let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(None);
        };
        let code = self.canonical_code(code);
        if self.rates.is_base(&code) {
            return Ok(None);
        }
        match self.rates.rate(&code) {
            Some(rate) if rate.is_finite() && rate > 0.0 => Ok(Some(rate)),
            Some(rate) => Err(PipelineError::InvalidRate { code, rate }),
            None => Err(PipelineError::UnknownCurrency {
                code,
                base: self.rates.base.clone(),
            }),
        }
    }

    /// Check every code up front so a batch fails before any record is converted.
    pub fn validate_codes<'c>(
        &self,
        codes: impl IntoIterator<Item = &'c str>,
    ) -> Result<(), PipelineError> {
        for code in codes {
            self.rate_for(Some(code))?;
        }
        Ok(())
    }

    pub fn normalize(
        &self,
        lower: Option<f64>,
        upper: Option<f64>,
        currency: Option<&str>,
    ) -> Result<NormalizedSalary, PipelineError> {
        let lower = lower.filter(|v| v.is_finite());
        let upper = upper.filter(|v| v.is_finite());
        let (lower, upper) = match fill_gap(lower, upper, self.settings.gap_fill_ratio) {
            (Some(lower), Some(upper)) if lower > upper => (upper, lower),
            (Some(lower), Some(upper)) => (lower, upper),
            _ => return Ok(NormalizedSalary::default()),
        };
        let rate = self.rate_for(currency)?.unwrap_or(1.0);
        Ok(NormalizedSalary {
            lower: Some(truncate(lower / rate)),
            upper: Some(truncate(upper / rate)),
        })
    }
}

fn truncate(value: f64) -> i64 {
    value.trunc() as i64
}
