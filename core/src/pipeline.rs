//! Dataset builder: wires the normalizers, the correlator and the
//! assembler into one build.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Catalog normalizer
//!   2. Registry normalizer
//!   3. Transcript decoding
//!   4. Event correlator     (reads catalog durations, uses the cache)
//!   5. Dataset assembler    (joins registry and catalog)
//!
//! RULES:
//!   - The cache is injected; the builder never opens one itself.
//!   - The reference date is resolved once, before any stage runs.

use crate::{
    assembler::{self, AssemblyReport, DatasetRow},
    cache::ExpirationCache,
    catalog::{self, PortfolioRecord},
    config::PipelineConfig,
    correlator::{CorrelationReport, EventCorrelator},
    error::PipelineResult,
    event::{self, RawEvent},
    registry::{self, ProfileRecord},
    store::{BuildRunRecord, PipelineStore},
    types::RunId,
};
use chrono::{DateTime, NaiveDate, Utc};

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub run_id:         RunId,
    pub reference_date: NaiveDate,
    pub started_at:     DateTime<Utc>,
    pub rows:           Vec<DatasetRow>,
    pub correlation:    CorrelationReport,
    pub assembly:       AssemblyReport,
}

impl BuildOutcome {
    pub fn to_record(&self, version: &str) -> BuildRunRecord {
        BuildRunRecord {
            run_id:           self.run_id.clone(),
            reference_date:   self.reference_date.to_string(),
            version:          version.to_string(),
            started_at:       self.started_at.to_rfc3339(),
            offer_events:     self.correlation.offer_events,
            instances:        self.correlation.instances,
            orphans_dropped:  self.correlation.orphans_dropped,
            cache_hit:        self.correlation.cache_hit,
            rows_written:     self.assembly.rows,
            dropped_no_user:  self.assembly.dropped_no_user,
            dropped_no_offer: self.assembly.dropped_no_offer,
        }
    }
}

pub struct DatasetBuilder {
    pub run_id: RunId,
    config:     PipelineConfig,
}

impl DatasetBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read the three sources named by the config and build the dataset.
    pub fn build(&self, cache: &mut dyn ExpirationCache) -> PipelineResult<BuildOutcome> {
        let started_at = Utc::now();
        let reference_date = self.config.resolve_reference_date();
        log::info!("Build {} started, membership counted to {reference_date}", self.run_id);

        let catalog = catalog::load_catalog(&self.config.portfolio_path)?;
        let registry = registry::load_registry(&self.config.profile_path, reference_date)?;
        let events = event::load_transcript(&self.config.transcript_path)?;

        self.run(catalog, registry, &events, reference_date, started_at, cache)
    }

    /// Build from records already in memory. Used by tests and tooling.
    pub fn build_from_records(
        &self,
        portfolio: Vec<PortfolioRecord>,
        profiles: Vec<ProfileRecord>,
        events: &[RawEvent],
        cache: &mut dyn ExpirationCache,
    ) -> PipelineResult<BuildOutcome> {
        let started_at = Utc::now();
        let reference_date = self.config.resolve_reference_date();

        let catalog = catalog::normalize_catalog(portfolio)?;
        let registry = registry::normalize_profiles(profiles, reference_date)?;

        self.run(catalog, registry, events, reference_date, started_at, cache)
    }

    fn run(
        &self,
        catalog: catalog::Catalog,
        registry: registry::Registry,
        events: &[RawEvent],
        reference_date: NaiveDate,
        started_at: DateTime<Utc>,
        cache: &mut dyn ExpirationCache,
    ) -> PipelineResult<BuildOutcome> {
        log::info!(
            "Reference data: {} offers, {} profiles, {} transcript events",
            catalog.len(),
            registry.len(),
            events.len()
        );

        let durations = catalog.duration_index();
        let correlation = EventCorrelator::new(&durations, self.config.orphan_policy)
            .correlate(events, cache)?;

        let assembly = assembler::assemble(&correlation.instances, &registry, &catalog);

        Ok(BuildOutcome {
            run_id: self.run_id.clone(),
            reference_date,
            started_at,
            rows: assembly.rows,
            correlation: correlation.report,
            assembly: assembly.report,
        })
    }

    /// Persist the build summary.
    pub fn record(&self, store: &PipelineStore, outcome: &BuildOutcome, version: &str) -> PipelineResult<()> {
        store.insert_build_run(&outcome.to_record(version))?;
        log::debug!("Build {} recorded", outcome.run_id);
        Ok(())
    }
}
