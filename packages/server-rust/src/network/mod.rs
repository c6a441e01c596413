//! Process-level plumbing: graceful shutdown and health probes.

pub mod probe;
pub mod shutdown;

pub use probe::{build_probe_router, serve_probes, ProbeState};
pub use shutdown::{listen_for_signals, HealthState, InFlightGuard, ShutdownController, ShutdownSignal};
