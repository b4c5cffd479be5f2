//! Transport layer: the one-shot HTTP adapter, failure classification, and backoff.

pub mod backoff;
pub mod classify;
pub mod transport;
