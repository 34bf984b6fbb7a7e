/// Process exit codes (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    InvalidConfiguration = 1,
    IoError = 2,
    UnsupportedFilesystem = 3,
    Cancelled = 4,
    Partial = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    pub fn from_error(error: &crate::OrcError) -> Self {
        match error {
            crate::OrcError::Configuration(_) => ExitCode::InvalidConfiguration,
            crate::OrcError::TransientIo { .. } | crate::OrcError::Io(_) => ExitCode::IoError,
            crate::OrcError::Fatal(_) => ExitCode::IoError,
            _ => ExitCode::IoError,
        }
    }
}
