//! ChromaFE: pseudocolor, enhancement and colorization engine.
//!
//! The [`Pipeline`] controller is the command surface: it owns the loaded
//! session, the bounded undo history, the live preview, and the background
//! colorization gate. Operators live in [`ops`] and are pure functions over
//! [`ImageBuffer`]s.

pub mod app;
pub mod canvas;
pub mod cli;
pub mod error;
pub mod history;
pub mod io;
pub mod jobs;
pub mod logger;
pub mod ops;
pub mod params;
pub mod project;
pub mod settings;

pub use app::{ApplyOutcome, DisplaySink, JobEvent, NullDisplay, Pipeline, SessionSummary};
pub use canvas::{ColorSpace, ImageBuffer};
pub use error::{CommandError, IoError, JobError, ModelError, ParamError};
pub use history::{HistoryEntry, HistoryStore};
pub use io::{EncodeOptions, FileCodec, ImageCodec, SaveFormat, TiffCompression};
pub use ops::colorize::{ColorizationAdapter, ColorizationModel, ColorizeOutcome, FallbackReason};
pub use ops::{Operator, OperatorId, Palette};
pub use settings::AppSettings;
