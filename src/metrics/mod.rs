//! Metrics export.
//!
//! Run totals can be pushed to a Prometheus Push Gateway once a run is done.
//!
//! # Submodules
//!
//! - `prom` - Prometheus metrics integration

pub mod prom;
