//! offertrail-core: rebuilds per-offer-instance timelines from a flat
//! offer transcript and joins them with profile and catalog data into a
//! tidy dataset.

pub mod assembler;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod correlator;
pub mod error;
pub mod event;
pub mod jsonl;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod types;
