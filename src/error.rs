// ============================================================================
// ERROR TAXONOMY: statuses returned by the command surface
// ============================================================================

use std::path::PathBuf;

pub use crate::ops::ai::ModelError;
pub use crate::params::ParamError;

/// Failure status of a command-surface call. Every failed command leaves the
/// session exactly as it was.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The command cannot run in the current state (no image loaded, nothing
    /// to undo, a colorization already pending, invalid parameter, ...).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    /// An operator produced no usable result.
    #[error("operator failed: {0}")]
    OperatorFailed(String),
    #[error(transparent)]
    Io(#[from] IoError),
}

impl CommandError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        CommandError::PreconditionFailed(msg.into())
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, CommandError::PreconditionFailed(_))
    }
}

/// Image I/O failures surfaced from the codec.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("failed to decode {}: {}", .path.display(), .source)]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode {}: {}", .path.display(), .source)]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("unsupported image format '{0}'")]
    UnsupportedFormat(String),
}

/// Rejections from the async execution gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("a colorization is already running (job {0})")]
    Busy(u64),
    #[error("no image to colorize")]
    NoImage,
}

impl From<JobError> for CommandError {
    fn from(e: JobError) -> Self {
        CommandError::PreconditionFailed(e.to_string())
    }
}

impl From<ParamError> for CommandError {
    fn from(e: ParamError) -> Self {
        CommandError::PreconditionFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_and_param_errors_become_preconditions() {
        assert!(CommandError::from(JobError::Busy(3)).is_precondition());
        let param = ParamError::NotFinite {
            name: "gamma",
            value: f32::NAN,
        };
        assert!(CommandError::from(param).is_precondition());
    }

    #[test]
    fn io_error_messages_name_the_path() {
        let e = IoError::Decode {
            path: PathBuf::from("missing.png"),
            source: image::ImageError::IoError(std::io::Error::other("not found")),
        };
        assert!(e.to_string().contains("missing.png"));
        let cmd: CommandError = e.into();
        assert!(!cmd.is_precondition());
    }
}
