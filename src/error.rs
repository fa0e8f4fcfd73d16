use crate::CaptureState;
use thiserror::Error;

/// Reasons a submitted URL is refused before it can become a seed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("the URL is empty")]
    EmptyUri,

    #[error("the URL failed to parse: {0}")]
    Parse(String),

    #[error("the URL has empty scheme")]
    EmptyScheme,

    #[error("the URL has forbidden scheme: {0}")]
    ForbiddenScheme(String),

    #[error("the URL must not be a loopback address")]
    Loopback,

    #[error("the URL host must not be a private IP address")]
    PrivateIp,

    #[error("the URL port must not be in well-known range: {0}")]
    WellKnownPort(u16),
}

impl UrlError {
    /// Message suitable for showing to the person who submitted the URL.
    pub fn user_message(&self) -> &'static str {
        match self {
            UrlError::EmptyUri => "Please enter a web address.",
            UrlError::Parse(_) => "The web address could not be understood.",
            UrlError::EmptyScheme => "The web address must start with http:// or https://.",
            UrlError::ForbiddenScheme(_) => "Only http:// and https:// addresses can be archived.",
            UrlError::Loopback => "Addresses pointing to this machine cannot be archived.",
            UrlError::PrivateIp => "Addresses in a private network cannot be archived.",
            UrlError::WellKnownPort(_) => "Addresses using a reserved port (1-1022) cannot be archived.",
        }
    }
}

/// Failures of the request/result channels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("invalid capture request: {0}")]
    InvalidRequest(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("broker transport error: {0}")]
    Transport(String),

    #[error("malformed result payload: {0}")]
    MalformedPayload(String),

    /// Nothing arrived within the requested timeout. Not a failure.
    #[error("operation timed out")]
    Timeout,
}

impl QueueError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, QueueError::Timeout)
    }

    /// Transport failures may clear up on their own; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Transport(_))
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            QueueError::Timeout => ErrorSeverity::Low,
            QueueError::InvalidRequest(_) | QueueError::MalformedPayload(_) => ErrorSeverity::Medium,
            QueueError::Serialization(_) => ErrorSeverity::Medium,
            QueueError::Transport(_) => ErrorSeverity::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("timestamp must have 14 or 17 digits, got {0} characters")]
    InvalidTimestampLength(usize),

    #[error("timestamp {0:?} does not match YYYYMMDDhhmmss[fff]")]
    InvalidTimestamp(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("seed {0} not found")]
    SeedNotFound(String),

    #[error("seeds group {0} not found")]
    GroupNotFound(String),

    #[error("shadow id {0} is already taken")]
    DuplicateShadowId(String),

    #[error("received batch with zero seeds")]
    EmptyBatch,

    /// A compare-and-set found the seed in a different state.
    #[error("seed {shadow_id} is {actual}, expected {expected}")]
    StateConflict {
        shadow_id: String,
        expected: CaptureState,
        actual: CaptureState,
    },

    #[error("record rejected: {0}")]
    InvariantViolation(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A state string that is not one of the four capture states.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0:?} is not a valid capture state")]
pub struct InvalidStateError(pub String);

/// Errors surfaced by the seed submission layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeedError {
    #[error("no input data")]
    EmptyInput,

    #[error("input data is too large ({size} bytes, limit {limit})")]
    InputTooLarge { size: usize, limit: usize },

    #[error("too many lines ({lines}, limit {limit})")]
    TooManyLines { lines: usize, limit: usize },

    #[error("line {line}: {source}")]
    InvalidUrl {
        line: usize,
        #[source]
        source: UrlError,
    },

    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition { from: CaptureState, to: CaptureState },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while handing seeds to the crawler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("enqueue failed: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    /// Seeds before the failing one stay enqueued and Pending.
    #[error("group capture stopped after {enqueued} of {total} seeds: {source}")]
    GroupPartiallyEnqueued {
        enqueued: usize,
        total: usize,
        #[source]
        source: Box<CaptureError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Transport(err.to_string())
    }
}

impl StoreError {
    /// The state a conflicting compare-and-set found, if that is what failed.
    pub fn conflicting_state(&self) -> Option<CaptureState> {
        match self {
            StoreError::StateConflict { actual, .. } => Some(*actual),
            _ => None,
        }
    }
}

impl SeedError {
    /// See [`StoreError::conflicting_state`].
    pub fn conflicting_state(&self) -> Option<CaptureState> {
        match self {
            SeedError::Store(e) => e.conflicting_state(),
            _ => None,
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}
