//! IIDC/Firewire machine-vision capture engine.
//!
//! Negotiates a camera's video mode against a caller's requested
//! parameters (`mode_select`), demosaics/converts dequeued frames
//! (`postprocess`), and drives the capture lifecycle and multi-camera
//! synchronization protocol (`session`, `sync`) over an abstract
//! [`iidc::IidcSurface`] collaborator. See `SPEC_FULL.md` at the
//! workspace root for the full design.

pub mod clock;
pub mod config;
pub mod error;
pub mod iidc;
pub mod mode_select;
pub mod parameter;
pub mod postprocess;
pub mod recorder;
pub mod session;
pub mod sinks;
pub mod sync;
pub mod types;
