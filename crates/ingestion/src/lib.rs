//! File ingestion: boundary clipping, the per-file orchestrator and the
//! storage/log reconciliation sweep.

pub mod clipper;
pub mod service;
pub mod sweep;

pub use clipper::{
    apply_geometry_mask, apply_rgba_mask, compute_window, create_mask, ClipWindow, Clipper,
};
pub use service::{IngestionResult, IngestionService};
pub use sweep::{sweep, SweepReport};
