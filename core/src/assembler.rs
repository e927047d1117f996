//! Dataset assembler: joins offer instances with profiles and offers.
//!
//! Inner-join semantics: an instance whose user or offer is missing from
//! the reference tables is dropped. That is policy, not an error, but the
//! drops are counted and logged.

use crate::{
    catalog::{Catalog, Channel, OfferTypeFlags},
    correlator::OfferInstance,
    registry::{GenderFlags, Registry},
    types::{Hour, OfferId, UserId},
};
use serde::{Deserialize, Serialize};

/// One row of the tidy dataset: one offer instance with every reference
/// attribute. Field order is the output column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub user_id:         UserId,
    pub offer_id:        OfferId,
    pub expiration:      Hour,
    pub received:        Hour,
    pub viewed:          Option<Hour>,
    pub completed:       Option<Hour>,
    pub age:             Option<u32>,
    pub income:          f64,
    pub membership_days: u64,
    #[serde(flatten)]
    pub gender:          GenderFlags,
    pub channels:        Vec<Channel>,
    pub duration_hours:  Hour,
    pub difficulty:      u32,
    pub reward:          u32,
    #[serde(flatten)]
    pub offer_type:      OfferTypeFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyReport {
    pub instances_in:     u64,
    pub dropped_no_user:  u64,
    pub dropped_no_offer: u64,
    pub rows:             u64,
}

#[derive(Debug, Clone)]
pub struct Assembly {
    pub rows:   Vec<DatasetRow>,
    pub report: AssemblyReport,
}

/// Join on user id first, then on offer id. Input order is preserved.
pub fn assemble(instances: &[OfferInstance], registry: &Registry, catalog: &Catalog) -> Assembly {
    let mut report = AssemblyReport {
        instances_in: instances.len() as u64,
        ..Default::default()
    };

    let rows: Vec<DatasetRow> = instances
        .iter()
        .filter_map(|inst| {
            let Some(profile) = registry.get(&inst.user_id) else {
                report.dropped_no_user += 1;
                return None;
            };
            let Some(offer) = catalog.get(&inst.offer_id) else {
                report.dropped_no_offer += 1;
                return None;
            };
            Some(DatasetRow {
                user_id:         inst.user_id.clone(),
                offer_id:        inst.offer_id.clone(),
                expiration:      inst.expiration,
                received:        inst.received,
                viewed:          inst.viewed,
                completed:       inst.completed,
                age:             profile.age,
                income:          profile.income,
                membership_days: profile.membership_days,
                gender:          profile.gender.flags(),
                channels:        offer.channels.clone(),
                duration_hours:  offer.duration_hours,
                difficulty:      offer.difficulty,
                reward:          offer.reward,
                offer_type:      offer.offer_type.flags(),
            })
        })
        .collect();

    report.rows = rows.len() as u64;
    if report.dropped_no_user > 0 || report.dropped_no_offer > 0 {
        log::info!(
            "Join dropped {} instances with no profile and {} with no offer",
            report.dropped_no_user,
            report.dropped_no_offer
        );
    }
    log::info!("Assembled {} dataset rows", report.rows);

    Assembly { rows, report }
}
