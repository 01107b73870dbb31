// Aggregates challenge detection and the upstream transport used around the Cloudflare gate.

pub mod core;
pub mod detectors;
