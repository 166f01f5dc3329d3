//! Observability for the rendezvous service.
//!
//! Structured logging goes through `tracing`; counters, gauges and histograms
//! go through the `metrics` facade and are exported by the Prometheus recorder
//! installed in `main`.

pub mod metrics;
