//! Pure, deterministic scoring.
//!
//! Nothing in here touches the database or the network; both scorers are
//! plain functions of their inputs, which is what lets the risk assessment
//! be recomputed on every read instead of persisted.

pub mod risk;
pub mod text;

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
