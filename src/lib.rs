//! Tessera: credential anchoring and issuance reliability engine.
//!
//! Ties the component crates together. [`IssuancePipeline`] hashes, registers
//! and anchors credentials; [`Engine`] wires the pipeline, the bulk issuance
//! queue, and the confirmation poller over one snapshot store.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod issuance;

pub use config::Config;
pub use engine::{Engine, EngineError};
pub use issuance::{
    content_hash, BulkIssuanceProcessor, IssuanceError, IssuancePipeline, IssuanceReceipt,
    IssuanceRequest,
};
