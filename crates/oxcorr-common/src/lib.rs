//! Shared domain types for the composite alert correlation pipeline.
//!
//! Alerts, strategies, query configs, and derived events flow between the
//! correlation crates (`oxcorr-store`, `oxcorr-correlate`) through the
//! definitions in [`types`]. Stable content hashing for dimension and
//! query-config identity lives in [`hash`].

pub mod hash;
pub mod types;
