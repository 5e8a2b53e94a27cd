//! Automated short-form vertical video generation.
//!
//! A run picks a trending topic, writes a narration script, voices it,
//! captions it, lays stock footage under it and encodes a 9:16 MP4.
//! [`pipeline::Orchestrator`] sequences those stages; the pure planning
//! steps live in [`script`], [`subtitle`] and [`compose`], and every
//! external service sits behind a trait in [`adapters`].

pub mod adapters;
pub mod audio;
pub mod compose;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod render;
pub mod script;
pub mod subtitle;

pub use config::{Niche, PipelineConfig};
pub use error::{ErrorKind, PipelineError, ServiceError};
pub use pipeline::{BatchSummary, CancelToken, Orchestrator, PipelineRun, RunEvent, RunState, Services, Stage};
