/// Broad failure categories.
///
/// The kind decides the process exit code and lets callers tell a fit that
/// failed to converge apart from bad input without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Mismatched channel sets, shapes, or empty bands.
    InvalidInput,
    /// Bad option values (tolerances, sample counts, thread counts).
    Config,
    /// The bounded least-squares solver ran out of evaluations.
    FitNonConvergence,
    /// A band has zero variance and the policy rejects it.
    DegenerateChannel,
    /// The match was cancelled before every channel finished.
    Cancelled,
    /// Filesystem or serialization failure.
    Io,
    /// Image decode/encode failure.
    Image,
}

impl ErrorKind {
    fn exit_code(self) -> u8 {
        match self {
            ErrorKind::InvalidInput | ErrorKind::Config => 2,
            ErrorKind::Io | ErrorKind::Image => 3,
            ErrorKind::FitNonConvergence | ErrorKind::DegenerateChannel => 4,
            ErrorKind::Cancelled => 5,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn image(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Image, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }

    /// Prefix the message with the channel it came from, keeping the kind.
    pub fn in_channel(self, label: &str) -> Self {
        Self {
            kind: self.kind,
            message: format!("channel {label}: {}", self.message),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
