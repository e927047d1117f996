//! Shared primitive types used across the entire pipeline.

/// Transcript time unit. One hour since the start of the experiment.
pub type Hour = u64;

/// Identifier of a user in the profile registry.
pub type UserId = String;

/// Identifier of an offer in the catalog.
pub type OfferId = String;

/// Identifier of a single dataset build.
pub type RunId = String;
