//! Event correlator: rebuilds offer instances from the flat transcript.
//!
//! Pipeline (fixed order):
//!   1. drop transactions
//!   2. resolve each event's offer id (done at parse time, see event.rs)
//!   3. drop exact duplicates, keeping first occurrence order
//!   4. infer an expiration for every remaining event (cached)
//!   5. pivot on (user, offer, expiration) into one row per instance
//!
//! The expiration is part of the instance key: the same offer sent twice
//! to the same user yields two instances with their own deadlines.

use crate::{
    cache::ExpirationCache,
    config::OrphanPolicy,
    error::{PipelineError, PipelineResult},
    event::{EventKey, EventKind, RawEvent},
    types::{Hour, OfferId, UserId},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// One occurrence of an offer sent to a user.
/// Invariant: `received <= viewed` and `received <= completed` when set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferInstance {
    pub user_id:    UserId,
    pub offer_id:   OfferId,
    pub expiration: Hour,
    pub received:   Hour,
    pub viewed:     Option<Hour>,
    pub completed:  Option<Hour>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationReport {
    pub events_read:            u64,
    pub transactions_discarded: u64,
    pub duplicates_removed:     u64,
    pub offer_events:           u64,
    pub orphans_dropped:        u64,
    pub cache_hit:              bool,
    pub instances:              u64,
}

#[derive(Debug, Clone)]
pub struct Correlation {
    pub instances: Vec<OfferInstance>,
    pub report:    CorrelationReport,
}

/// Reception times per (user, offer), sorted ascending.
pub(crate) struct ReceptionIndex<'a> {
    times: HashMap<(&'a str, &'a str), Vec<Hour>>,
}

impl<'a> ReceptionIndex<'a> {
    pub(crate) fn build(keys: &'a [EventKey]) -> Self {
        let mut times: HashMap<(&str, &str), Vec<Hour>> = HashMap::new();
        for k in keys.iter().filter(|k| k.kind == EventKind::OfferReceived) {
            times
                .entry((k.user_id.as_str(), k.offer_id.as_str()))
                .or_default()
                .push(k.time);
        }
        for v in times.values_mut() {
            v.sort_unstable();
            v.dedup();
        }
        Self { times }
    }

    /// Latest reception at or before `time`.
    pub(crate) fn nearest_preceding(&self, user_id: &str, offer_id: &str, time: Hour) -> Option<Hour> {
        let times = self.times.get(&(user_id, offer_id))?;
        let idx = times.partition_point(|&t| t <= time);
        idx.checked_sub(1).map(|i| times[i])
    }
}

pub struct EventCorrelator<'a> {
    durations: &'a HashMap<OfferId, Hour>,
    policy:    OrphanPolicy,
}

impl<'a> EventCorrelator<'a> {
    pub fn new(durations: &'a HashMap<OfferId, Hour>, policy: OrphanPolicy) -> Self {
        Self { durations, policy }
    }

    pub fn correlate(
        &self,
        events: &[RawEvent],
        cache: &mut dyn ExpirationCache,
    ) -> PipelineResult<Correlation> {
        let mut report = CorrelationReport {
            events_read: events.len() as u64,
            ..Default::default()
        };

        let keys = offer_event_keys(events, &mut report);

        let expirations = match cache.fetch(&keys)? {
            Some(values) if self.is_consistent(&keys, &values) => {
                log::debug!("Expiration cache hit ({}): {} entries", cache.name(), keys.len());
                report.cache_hit = true;
                values
            }
            Some(_) => {
                log::warn!("Expiration cache ({}) disagrees with the catalog; recomputing", cache.name());
                self.compute_and_persist(&keys, cache)?
            }
            None => {
                log::debug!("Expiration cache miss ({}); computing {} entries", cache.name(), keys.len());
                self.compute_and_persist(&keys, cache)?
            }
        };

        let instances = self.pivot(&keys, &expirations, &mut report)?;
        report.instances = instances.len() as u64;

        log::info!(
            "Correlated {} offer events into {} instances ({} transactions, {} duplicates, {} orphans dropped)",
            report.offer_events,
            report.instances,
            report.transactions_discarded,
            report.duplicates_removed,
            report.orphans_dropped,
        );
        Ok(Correlation { instances, report })
    }

    fn duration(&self, offer_id: &str) -> PipelineResult<Hour> {
        self.durations
            .get(offer_id)
            .copied()
            .ok_or_else(|| PipelineError::UnknownOffer {
                offer_id: offer_id.to_string(),
            })
    }

    fn orphan(&self, key: &EventKey) -> PipelineResult<Option<Hour>> {
        match self.policy {
            OrphanPolicy::Fail => Err(PipelineError::OrphanEvent {
                user_id:  key.user_id.clone(),
                offer_id: key.offer_id.clone(),
                event:    key.kind.as_str(),
                time:     key.time,
            }),
            OrphanPolicy::Drop => {
                log::warn!(
                    "Dropping {} of offer {} for user {} at {}: no prior reception",
                    key.kind.as_str(),
                    key.offer_id,
                    key.user_id,
                    key.time
                );
                Ok(None)
            }
        }
    }

    /// Expiration per key, in key order. None marks a dropped orphan.
    pub fn compute_expirations(&self, keys: &[EventKey]) -> PipelineResult<Vec<Option<Hour>>> {
        let index = ReceptionIndex::build(keys);
        keys.iter()
            .map(|key| {
                let duration = self.duration(&key.offer_id)?;
                let start = match key.kind {
                    EventKind::OfferReceived => Some(key.time),
                    _ => index.nearest_preceding(&key.user_id, &key.offer_id, key.time),
                };
                match start {
                    Some(t) => t
                        .checked_add(duration)
                        .map(Some)
                        .ok_or_else(|| PipelineError::ExpirationOverflow {
                            offer_id: key.offer_id.clone(),
                            event:    key.kind.as_str(),
                            time:     key.time,
                        }),
                    None => self.orphan(key),
                }
            })
            .collect()
    }

    fn compute_and_persist(
        &self,
        keys: &[EventKey],
        cache: &mut dyn ExpirationCache,
    ) -> PipelineResult<Vec<Option<Hour>>> {
        let values = self.compute_expirations(keys)?;
        let entries: Vec<(EventKey, Option<Hour>)> =
            keys.iter().cloned().zip(values.iter().copied()).collect();
        cache.persist(&entries)?;
        Ok(values)
    }

    /// Cached values must still agree with the current catalog: every
    /// reception expires exactly one duration after it, and every other
    /// event lands on a reception's deadline.
    fn is_consistent(&self, keys: &[EventKey], values: &[Option<Hour>]) -> bool {
        let mut deadlines: HashSet<(&str, &str, Hour)> = HashSet::new();
        for (key, value) in keys.iter().zip(values) {
            if key.kind != EventKind::OfferReceived {
                continue;
            }
            let Some(duration) = self.durations.get(&key.offer_id) else {
                return false;
            };
            let Some(deadline) = key.time.checked_add(*duration) else {
                return false;
            };
            if *value != Some(deadline) {
                return false;
            }
            deadlines.insert((key.user_id.as_str(), key.offer_id.as_str(), deadline));
        }
        keys.iter().zip(values).all(|(key, value)| match value {
            Some(e) => deadlines.contains(&(key.user_id.as_str(), key.offer_id.as_str(), *e)),
            None => key.kind != EventKind::OfferReceived,
        })
    }

    fn pivot(
        &self,
        keys: &[EventKey],
        expirations: &[Option<Hour>],
        report: &mut CorrelationReport,
    ) -> PipelineResult<Vec<OfferInstance>> {
        #[derive(Default)]
        struct Slots {
            received:  Option<Hour>,
            viewed:    Option<Hour>,
            completed: Option<Hour>,
        }

        fn keep_earliest(slot: &mut Option<Hour>, time: Hour) {
            *slot = Some(slot.map_or(time, |t| t.min(time)));
        }

        let mut groups: BTreeMap<(&str, &str, Hour), Slots> = BTreeMap::new();
        for (key, expiration) in keys.iter().zip(expirations) {
            let Some(expiration) = *expiration else {
                // Cached orphans are re-judged under the current policy.
                self.orphan(key)?;
                report.orphans_dropped += 1;
                continue;
            };
            let slots = groups
                .entry((key.user_id.as_str(), key.offer_id.as_str(), expiration))
                .or_default();
            match key.kind {
                EventKind::OfferReceived  => keep_earliest(&mut slots.received, key.time),
                EventKind::OfferViewed    => keep_earliest(&mut slots.viewed, key.time),
                EventKind::OfferCompleted => keep_earliest(&mut slots.completed, key.time),
                EventKind::Transaction    => {}
            }
        }

        groups
            .into_iter()
            .map(|((user_id, offer_id, expiration), slots)| {
                let received = slots.received.ok_or_else(|| {
                    PipelineError::Other(anyhow::anyhow!(
                        "instance ({user_id}, {offer_id}, {expiration}) has no reception"
                    ))
                })?;
                Ok(OfferInstance {
                    user_id: user_id.to_string(),
                    offer_id: offer_id.to_string(),
                    expiration,
                    received,
                    viewed: slots.viewed,
                    completed: slots.completed,
                })
            })
            .collect()
    }
}

/// Steps 1 to 3: natural keys of offer events, duplicates removed.
fn offer_event_keys(events: &[RawEvent], report: &mut CorrelationReport) -> Vec<EventKey> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for event in events {
        let Some(key) = event.key() else {
            report.transactions_discarded += 1;
            continue;
        };
        if seen.insert(key.clone()) {
            keys.push(key);
        } else {
            report.duplicates_removed += 1;
        }
    }
    report.offer_events = keys.len() as u64;
    keys
}
