//! Core library: fingerprinting, classification, the ingest pipeline, change
//! monitoring and duplicate detection.

pub mod classifier;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod mime;
pub mod models;
pub mod monitor;
pub mod pipeline;
pub mod sink;
pub mod tagging;
pub mod walker;

pub use error::{MonitorError, PipelineError, ProcessError, SinkError};
pub use pipeline::{Pipeline, PipelineSettings, PipelineSummary};
