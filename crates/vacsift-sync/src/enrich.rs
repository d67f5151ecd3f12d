//! Raw posting to enriched posting, one batch at a time.

use tracing::debug;
use vacsift_core::{CurrencyRateTable, EnrichedPosting, GeographyCatalog, RawPosting};

use crate::error::PipelineError;
use crate::extract::extract_fields;
use crate::geography::GeographyResolver;
use crate::salary::SalaryNormalizer;
use crate::settings::PipelineSettings;

/// Run-scoped enrichment over fixed reference data.
pub struct Enricher<'a> {
    salary: SalaryNormalizer<'a>,
    geography: GeographyResolver<'a>,
}

impl<'a> Enricher<'a> {
    pub fn new(
        rates: &'a CurrencyRateTable,
        catalog: &'a GeographyCatalog,
        settings: &'a PipelineSettings,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            salary: SalaryNormalizer::new(rates, &settings.normalization)?,
            geography: GeographyResolver::new(catalog, &settings.geography),
        })
    }

    /// Consumes the raw posting, so salary conversion happens exactly once per record.
    pub fn enrich(&mut self, raw: RawPosting) -> Result<EnrichedPosting, PipelineError> {
        let salary = self
            .salary
            .normalize(raw.salary_from, raw.salary_to, raw.currency.as_deref())?;
        let country = self.geography.resolve(raw.locality.as_deref());
        let fields = extract_fields(&raw.detail);

        Ok(EnrichedPosting {
            id: raw.id,
            title: raw.title,
            employer: raw.employer,
            locality: raw.locality,
            country,
            salary_from: salary.lower(),
            salary_to: salary.upper(),
            experience: raw.experience,
            published_at: raw.published_at,
            detail_url: raw.detail_url,
            key_skills: fields.key_skills,
            language: fields.language.code,
            language_level: fields.language.level,
            schedule: fields.schedule,
            description: fields.description,
        })
    }

    /// Enrich a whole batch, failing before any conversion if a salaried posting
    /// carries a currency the rate table cannot convert.
    pub fn enrich_batch(
        &mut self,
        raws: Vec<RawPosting>,
    ) -> Result<Vec<EnrichedPosting>, PipelineError> {
        self.salary.validate_codes(
            raws.iter()
                .filter(|raw| raw.salary_from.is_some() || raw.salary_to.is_some())
                .filter_map(|raw| raw.currency.as_deref()),
        )?;
        let enriched = raws
            .into_iter()
            .map(|raw| self.enrich(raw))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            postings = enriched.len(),
            catalog_walks = self.geography.tree_walks(),
            "enriched batch"
        );
        Ok(enriched)
    }

    pub fn geography(&self) -> &GeographyResolver<'a> {
        &self.geography
    }
}
