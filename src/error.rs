// ============================================================================
// ERRORS - failure taxonomy for the compute core
// ============================================================================
//
// Fatal (setup / contract defects): NoAdapter, Device, Allocation,
// UnknownKernel, ArgumentCount, ReadOnlyOutput, ShapeMismatch, NoProgram.
// Recoverable (rolled back, surfaced for display): Compile, Template, Decode,
// Preset.  Usage is a command-line input error.

use std::path::PathBuf;

pub type ComputeResult<T> = Result<T, ComputeError>;

#[derive(thiserror::Error, Debug)]
pub enum ComputeError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("device request failed: {0}")]
    Device(String),

    #[error("allocation failed for `{label}`: {reason}")]
    Allocation { label: String, reason: String },

    #[error("kernel compilation failed:\n{0}")]
    Compile(String),

    #[error("kernel template is missing the `{0}` marker")]
    Template(&'static str),

    #[error("unknown kernel `{0}`")]
    UnknownKernel(String),

    #[error("kernel `{kernel}` takes {expected} arguments, got {got}")]
    ArgumentCount {
        kernel: String,
        expected: usize,
        got: usize,
    },

    #[error("kernel `{kernel}` writes argument {index} but `{label}` is read-only")]
    ReadOnlyOutput {
        kernel: String,
        index: usize,
        label: String,
    },

    #[error("shape mismatch: `{label}` is {found}, expected {expected}")]
    ShapeMismatch {
        label: String,
        expected: String,
        found: String,
    },

    #[error("compute queue is busy; join before recompiling")]
    QueueBusy,

    #[error("no kernel program has been compiled")]
    NoProgram,

    #[error("readback of `{label}` failed: {reason}")]
    Readback { label: String, reason: String },

    #[error("image `{}` could not be decoded: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("preset error: {0}")]
    Preset(String),

    #[error("invalid argument: {0}")]
    Usage(String),

    #[error("image encode failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ComputeError {
    pub fn allocation(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Allocation {
            label: label.into(),
            reason: reason.into(),
        }
    }

    pub fn readback(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Readback {
            label: label.into(),
            reason: reason.into(),
        }
    }

    /// Errors the caller is expected to recover from locally.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Compile(_) | Self::Template(_) | Self::Decode { .. } | Self::Preset(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            ComputeError::allocation("field1", "too large")
                .to_string()
                .starts_with("allocation failed for `field1`")
        );
        assert!(
            ComputeError::Compile("error: expected `;`".into())
                .to_string()
                .contains("expected `;`")
        );
        assert_eq!(
            ComputeError::UnknownKernel("nope".into()).to_string(),
            "unknown kernel `nope`"
        );
        assert!(
            ComputeError::readback("pix", "map failed")
                .to_string()
                .contains("map failed")
        );
    }

    #[test]
    fn recoverable_classes() {
        assert!(ComputeError::Compile(String::new()).is_recoverable());
        assert!(
            ComputeError::Decode {
                path: PathBuf::from("mimg/missing.png"),
                reason: "not found".into(),
            }
            .is_recoverable()
        );
        assert!(!ComputeError::NoAdapter.is_recoverable());
        assert!(!ComputeError::UnknownKernel("x".into()).is_recoverable());
    }

    #[test]
    fn usage_errors_name_the_argument() {
        let err = ComputeError::Usage("unknown mode 'quad'".into());
        assert_eq!(err.to_string(), "invalid argument: unknown mode 'quad'");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn io_errors_convert() {
        let err: ComputeError = std::io::Error::other("boom").into();
        assert!(err.to_string().contains("boom"));
    }
}
