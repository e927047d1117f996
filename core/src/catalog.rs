//! Catalog normalizer: the offer portfolio as reference data.
//!
//! Pre-processing:
//!   - duration converted from days to hours (the canonical unit)
//!   - offer type expanded into dummy flags
//!   - `id` exposed as `offer_id`

use crate::{
    error::{PipelineError, PipelineResult},
    jsonl,
    types::{Hour, OfferId},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub const SOURCE_NAME: &str = "portfolio";
pub const HOURS_PER_DAY: Hour = 24;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Mobile,
    Social,
    Web,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OfferType {
    Bogo,
    Discount,
    Informational,
}

impl OfferType {
    pub fn flags(&self) -> OfferTypeFlags {
        OfferTypeFlags {
            offer_type_bogo:          matches!(self, Self::Bogo),
            offer_type_discount:      matches!(self, Self::Discount),
            offer_type_informational: matches!(self, Self::Informational),
        }
    }
}

/// Dummy-column expansion of [`OfferType`]. Exactly one flag is set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OfferTypeFlags {
    pub offer_type_bogo:          bool,
    pub offer_type_discount:      bool,
    pub offer_type_informational: bool,
}

/// One line of the portfolio source. `duration` is in whole days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRecord {
    pub id:         OfferId,
    pub channels:   Vec<Channel>,
    pub duration:   u64,
    pub difficulty: u32,
    pub reward:     u32,
    pub offer_type: OfferType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferDefinition {
    pub offer_id:       OfferId,
    pub channels:       Vec<Channel>,
    pub duration_hours: Hour,
    pub difficulty:     u32,
    pub reward:         u32,
    pub offer_type:     OfferType,
}

impl OfferDefinition {
    fn from_record(r: PortfolioRecord, line: usize) -> PipelineResult<Self> {
        let duration_hours = r.duration.checked_mul(HOURS_PER_DAY).ok_or_else(|| {
            PipelineError::malformed(
                SOURCE_NAME,
                line,
                format!("duration of {} days overflows the hour range", r.duration),
            )
        })?;
        Ok(Self {
            offer_id: r.id,
            channels: r.channels,
            duration_hours,
            difficulty: r.difficulty,
            reward: r.reward,
            offer_type: r.offer_type,
        })
    }
}

/// The normalized catalog. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    offers: BTreeMap<OfferId, OfferDefinition>,
}

impl Catalog {
    pub fn get(&self, offer_id: &str) -> Option<&OfferDefinition> {
        self.offers.get(offer_id)
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    /// Offer id → canonical duration in hours. This is the only catalog
    /// data the correlator needs.
    pub fn duration_index(&self) -> HashMap<OfferId, Hour> {
        self.offers
            .values()
            .map(|o| (o.offer_id.clone(), o.duration_hours))
            .collect()
    }
}

pub fn normalize_catalog(records: Vec<PortfolioRecord>) -> PipelineResult<Catalog> {
    normalize_numbered(records.into_iter().enumerate().map(|(idx, r)| (idx + 1, r)))
}

/// Records paired with their source line, as read by [`jsonl::read_numbered`].
fn normalize_numbered(records: impl IntoIterator<Item = (usize, PortfolioRecord)>) -> PipelineResult<Catalog> {
    let mut offers = BTreeMap::new();
    for (line, record) in records {
        let offer = OfferDefinition::from_record(record, line)?;
        if offers.contains_key(&offer.offer_id) {
            return Err(PipelineError::malformed(
                SOURCE_NAME,
                line,
                format!("duplicate offer id '{}'", offer.offer_id),
            ));
        }
        offers.insert(offer.offer_id.clone(), offer);
    }
    Ok(Catalog { offers })
}

pub fn load_catalog(path: &Path) -> PipelineResult<Catalog> {
    let records = jsonl::read_numbered(path, SOURCE_NAME)?;
    normalize_numbered(records)
}
