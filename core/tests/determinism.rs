//! Properties that must hold for any transcript, checked on seeded random
//! transcripts: idempotence, key uniqueness, exact expirations, ordering
//! of times within an instance, and cache round-trip.

use offertrail_core::{
    cache::MemoryCache,
    config::OrphanPolicy,
    correlator::{Correlation, EventCorrelator},
    event::{EventKind, EventPayload, RawEvent},
    types::Hour,
};
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::collections::{HashMap, HashSet};

const OFFERS: [(&str, Hour); 3] = [("bogo-5", 120), ("disc-7", 168), ("info-3", 72)];
const SEND_TIMES: [Hour; 6] = [0, 168, 336, 408, 504, 576];

fn durations() -> HashMap<String, Hour> {
    OFFERS.iter().map(|(id, d)| (id.to_string(), *d)).collect()
}

fn offer_event(user: &str, kind: EventKind, offer: &str, time: Hour) -> RawEvent {
    RawEvent {
        user_id: user.into(),
        kind,
        payload: EventPayload::Offer { offer_id: offer.into() },
        time,
    }
}

/// A plausible transcript: every view/completion follows some reception of
/// the same offer, with transactions and duplicates mixed in, shuffled.
fn random_transcript(seed: u64) -> Vec<RawEvent> {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let mut events = Vec::new();

    for u in 0..40 {
        let user = format!("user-{u:02}");
        for &send in &SEND_TIMES {
            if !rng.gen_bool(0.6) {
                continue;
            }
            let (offer, duration) = OFFERS[rng.gen_range(0..OFFERS.len())];
            events.push(offer_event(&user, EventKind::OfferReceived, offer, send));
            if rng.gen_bool(0.7) {
                let t = send + rng.gen_range(0..duration);
                events.push(offer_event(&user, EventKind::OfferViewed, offer, t));
            }
            if rng.gen_bool(0.4) {
                let t = send + rng.gen_range(0..duration);
                events.push(offer_event(&user, EventKind::OfferCompleted, offer, t));
            }
            if rng.gen_bool(0.5) {
                events.push(RawEvent {
                    user_id: user.clone(),
                    kind: EventKind::Transaction,
                    payload: EventPayload::Transaction { amount: rng.gen_range(0.5..50.0) },
                    time: send + rng.gen_range(0..24),
                });
            }
        }
    }

    let dupes: Vec<RawEvent> = events
        .iter()
        .filter(|e| e.kind != EventKind::Transaction)
        .take(15)
        .cloned()
        .collect();
    events.extend(dupes);
    events.shuffle(&mut rng);
    events
}

fn correlate(events: &[RawEvent], cache: &mut MemoryCache) -> Correlation {
    let durations = durations();
    EventCorrelator::new(&durations, OrphanPolicy::Fail)
        .correlate(events, cache)
        .expect("generated transcripts never contain orphans")
}

#[test]
fn same_input_twice_gives_identical_tables() {
    for seed in [1u64, 42, 0xDEAD_BEEF] {
        let events = random_transcript(seed);
        let a = correlate(&events, &mut MemoryCache::new());
        let b = correlate(&events, &mut MemoryCache::new());
        assert_eq!(a.instances, b.instances, "Output diverged for seed {seed}");
        assert_eq!(a.report, b.report, "Report diverged for seed {seed}");
    }
}

#[test]
fn instance_keys_are_unique() {
    let events = random_transcript(7);
    let result = correlate(&events, &mut MemoryCache::new());

    let mut seen = HashSet::new();
    for inst in &result.instances {
        assert!(
            seen.insert((&inst.user_id, &inst.offer_id, inst.expiration)),
            "Duplicate instance key {:?}",
            (&inst.user_id, &inst.offer_id, inst.expiration)
        );
    }
    assert!(!result.instances.is_empty());
}

#[test]
fn expiration_is_reception_plus_duration() {
    let durations = durations();
    let events = random_transcript(99);
    let result = correlate(&events, &mut MemoryCache::new());

    for inst in &result.instances {
        assert_eq!(
            inst.expiration,
            inst.received + durations[&inst.offer_id],
            "Bad expiration for {inst:?}"
        );
    }
}

#[test]
fn reception_never_follows_view_or_completion() {
    let events = random_transcript(2024);
    let result = correlate(&events, &mut MemoryCache::new());

    for inst in &result.instances {
        if let Some(v) = inst.viewed {
            assert!(inst.received <= v, "Viewed before received: {inst:?}");
            assert!(v < inst.expiration, "Generated views fall inside the window: {inst:?}");
        }
        if let Some(c) = inst.completed {
            assert!(inst.received <= c, "Completed before received: {inst:?}");
        }
    }
}

#[test]
fn every_reception_yields_exactly_one_instance() {
    let events = random_transcript(5);
    let result = correlate(&events, &mut MemoryCache::new());

    let receptions: HashSet<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::OfferReceived)
        .map(|e| (e.user_id.clone(), e.offer_id().unwrap().to_string(), e.time))
        .collect();
    assert_eq!(result.instances.len(), receptions.len());
    assert!(
        result.report.duplicates_removed >= 15,
        "The 15 injected copies must be removed; got {}",
        result.report.duplicates_removed
    );
}

#[test]
fn cached_values_equal_fresh_values() {
    let events = random_transcript(31337);
    let mut cache = MemoryCache::new();

    let fresh = correlate(&events, &mut cache);
    let cached = correlate(&events, &mut cache);

    assert!(cached.report.cache_hit);
    assert_eq!(fresh.instances, cached.instances);
}
