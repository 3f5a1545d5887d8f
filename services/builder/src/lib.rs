//! kiln image builder.
//!
//! A build is a fixed sequence of [`Step`]s run by a [`Pipeline`] against one
//! [`BuildState`]. Each step pairs the work that creates cloud resources with
//! the cleanup that removes them; the pipeline runs cleanups in reverse when
//! the build halts and again once the image has been captured.

pub mod artifact;
pub mod builder;
pub mod config;
pub mod error;
pub mod hook;
pub mod pipeline;
pub mod refresh;
pub mod state;
pub mod step;
pub mod steps;
pub mod template;
pub mod ui;

pub use artifact::Artifact;
pub use builder::Builder;
pub use error::{BuildError, ConfigError, StepError};
pub use pipeline::{OnError, Pipeline};
pub use state::BuildState;
pub use step::{Step, StepPolicy};
pub use template::BuildConfig;
pub use ui::{ConsoleUi, MemoryUi, Ui};
