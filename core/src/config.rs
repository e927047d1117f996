use crate::error::{PipelineError, PipelineResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const PORTFOLIO_FILE: &str = "portfolio.json";
pub const PROFILE_FILE: &str = "profile.json";
pub const TRANSCRIPT_FILE: &str = "transcript.json";
pub const CACHE_DB_FILE: &str = "expiration_cache.db";
pub const OVERRIDES_FILE: &str = "pipeline.json";

/// What to do with a view or completion that has no reception at or
/// before it for the same (user, offer).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Abort the build with a descriptive error.
    #[default]
    Fail,
    /// Log a warning and leave the event out of every instance.
    Drop,
}

impl std::str::FromStr for OrphanPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(Self::Fail),
            "drop" => Ok(Self::Drop),
            other => Err(PipelineError::InvalidConfig {
                reason: format!("orphan policy must be 'fail' or 'drop', got '{other}'"),
            }),
        }
    }
}

/// Optional `pipeline.json` in the data directory. Every field may be
/// omitted; relative paths resolve against the data directory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct OverridesFile {
    portfolio:      Option<PathBuf>,
    profile:        Option<PathBuf>,
    transcript:     Option<PathBuf>,
    cache_db:       Option<PathBuf>,
    reference_date: Option<NaiveDate>,
    orphan_policy:  Option<OrphanPolicy>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub portfolio_path:  PathBuf,
    pub profile_path:    PathBuf,
    pub transcript_path: PathBuf,
    pub cache_db_path:   PathBuf,
    /// Date membership is counted up to. None means "today", resolved
    /// once per build.
    pub reference_date:  Option<NaiveDate>,
    pub orphan_policy:   OrphanPolicy,
}

impl PipelineConfig {
    /// Defaults for a data directory, without reading anything.
    pub fn for_data_dir(data_dir: &Path) -> Self {
        Self {
            portfolio_path:  data_dir.join(PORTFOLIO_FILE),
            profile_path:    data_dir.join(PROFILE_FILE),
            transcript_path: data_dir.join(TRANSCRIPT_FILE),
            cache_db_path:   data_dir.join(CACHE_DB_FILE),
            reference_date:  None,
            orphan_policy:   OrphanPolicy::default(),
        }
    }

    /// Load from the data/ directory, applying `pipeline.json` if present.
    /// In tests, use PipelineConfig::default_test().
    pub fn load(data_dir: &str) -> PipelineResult<Self> {
        let dir = Path::new(data_dir);
        let mut config = Self::for_data_dir(dir);

        let overrides_path = dir.join(OVERRIDES_FILE);
        if !overrides_path.exists() {
            log::debug!("No {} in {data_dir}, using defaults", OVERRIDES_FILE);
            return Ok(config);
        }

        let content = std::fs::read_to_string(&overrides_path)
            .map_err(|e| PipelineError::io(&overrides_path, e))?;
        let file: OverridesFile = serde_json::from_str(&content).map_err(|e| PipelineError::InvalidConfig {
            reason: format!("{}: {e}", overrides_path.display()),
        })?;

        if let Some(p) = file.portfolio {
            config.portfolio_path = dir.join(p);
        }
        if let Some(p) = file.profile {
            config.profile_path = dir.join(p);
        }
        if let Some(p) = file.transcript {
            config.transcript_path = dir.join(p);
        }
        if let Some(p) = file.cache_db {
            config.cache_db_path = dir.join(p);
        }
        if file.reference_date.is_some() {
            config.reference_date = file.reference_date;
        }
        if let Some(policy) = file.orphan_policy {
            config.orphan_policy = policy;
        }
        log::info!("Applied overrides from {}", overrides_path.display());
        Ok(config)
    }

    /// Config with a frozen reference date for use in tests.
    pub fn default_test() -> Self {
        Self {
            reference_date: NaiveDate::from_ymd_opt(2018, 7, 26),
            ..Self::for_data_dir(Path::new("test-data"))
        }
    }

    pub fn resolve_reference_date(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }
}
