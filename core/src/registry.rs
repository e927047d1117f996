//! Registry normalizer: user profiles as reference data.
//!
//! Pre-processing:
//!   - gender letters mapped to labels, missing gender kept as `unknown`
//!   - gender expanded into dummy flags
//!   - missing income replaced by zero
//!   - `became_member_on` replaced by `membership_days`, counted up to an
//!     explicit reference date so that builds are reproducible

use crate::{
    error::{PipelineError, PipelineResult},
    jsonl,
    types::UserId,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const SOURCE_NAME: &str = "profile";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
    /// Missing or unrecognised in the source. A category of its own,
    /// never dropped.
    Unknown,
}

impl Gender {
    /// Map the source letter. Missing or unrecognised letters both land
    /// in [`Gender::Unknown`].
    pub fn from_source(letter: Option<&str>) -> Self {
        match letter {
            Some("M") => Self::Male,
            Some("F") => Self::Female,
            Some("O") => Self::Other,
            _         => Self::Unknown,
        }
    }

    pub fn flags(&self) -> GenderFlags {
        GenderFlags {
            gender_male:    matches!(self, Self::Male),
            gender_female:  matches!(self, Self::Female),
            gender_other:   matches!(self, Self::Other),
            gender_unknown: matches!(self, Self::Unknown),
        }
    }
}

/// Dummy-column expansion of [`Gender`]. Exactly one flag is set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GenderFlags {
    pub gender_male:    bool,
    pub gender_female:  bool,
    pub gender_other:   bool,
    pub gender_unknown: bool,
}

/// One line of the profile source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: UserId,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub income: Option<f64>,
    /// Enrollment date as a YYYYMMDD number.
    pub became_member_on: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub user_id:         UserId,
    pub age:             Option<u32>,
    pub income:          f64,
    pub membership_days: u64,
    pub gender:          Gender,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    profiles: BTreeMap<UserId, UserProfile>,
}

impl Registry {
    pub fn get(&self, user_id: &str) -> Option<&UserProfile> {
        self.profiles.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Parse a YYYYMMDD number into a calendar date.
pub fn parse_member_date(raw: u32) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&raw.to_string(), "%Y%m%d").ok()
}

fn normalize_profile(record: ProfileRecord, reference_date: NaiveDate, line: usize) -> PipelineResult<UserProfile> {
    let gender = Gender::from_source(record.gender.as_deref());
    if let (Gender::Unknown, Some(letter)) = (gender, record.gender.as_deref()) {
        log::warn!("Profile '{}' at line {line}: unrecognised gender '{letter}', kept as unknown", record.id);
    }

    let enrolled = parse_member_date(record.became_member_on).ok_or_else(|| {
        PipelineError::malformed(
            SOURCE_NAME,
            line,
            format!("became_member_on {} is not a YYYYMMDD date", record.became_member_on),
        )
    })?;

    let days = (reference_date - enrolled).num_days();
    let membership_days = u64::try_from(days).map_err(|_| {
        PipelineError::malformed(
            SOURCE_NAME,
            line,
            format!("enrolled on {enrolled}, after reference date {reference_date}"),
        )
    })?;

    Ok(UserProfile {
        user_id: record.id,
        age: record.age,
        income: record.income.unwrap_or(0.0),
        membership_days,
        gender,
    })
}

pub fn normalize_profiles(records: Vec<ProfileRecord>, reference_date: NaiveDate) -> PipelineResult<Registry> {
    normalize_numbered(
        records.into_iter().enumerate().map(|(idx, r)| (idx + 1, r)),
        reference_date,
    )
}

/// Records paired with their source line, as read by [`jsonl::read_numbered`].
fn normalize_numbered(
    records: impl IntoIterator<Item = (usize, ProfileRecord)>,
    reference_date: NaiveDate,
) -> PipelineResult<Registry> {
    let mut profiles = BTreeMap::new();
    for (line, record) in records {
        let profile = normalize_profile(record, reference_date, line)?;
        if profiles.contains_key(&profile.user_id) {
            return Err(PipelineError::malformed(
                SOURCE_NAME,
                line,
                format!("duplicate user id '{}'", profile.user_id),
            ));
        }
        profiles.insert(profile.user_id.clone(), profile);
    }
    Ok(Registry { profiles })
}

pub fn load_registry(path: &Path, reference_date: NaiveDate) -> PipelineResult<Registry> {
    let records = jsonl::read_numbered(path, SOURCE_NAME)?;
    normalize_numbered(records, reference_date)
}
