//! Request-handler surface consumed by the external web layer.
//!
//! Versioned modules (currently `v1`) group related handlers to keep the
//! interface stable while we iterate on the implementation details.

pub mod v1;
