use thiserror::Error;

/// Main error type for the radiam engine
#[derive(Error, Debug)]
pub enum RadiamError {
    // ========================================
    // Codec / ingress errors
    // ========================================
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("message truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("invalid value for AVP {code}: {reason}")]
    InvalidAvpValue { code: u32, reason: String },

    #[error("bad authenticator")]
    BadAuthenticator,

    #[error("unknown client: {0}")]
    UnknownClient(String),

    // ========================================
    // Diameter peer errors
    // ========================================
    #[error("peer {0} is not engaged")]
    PeerNotEngaged(String),

    #[error("peer {0} closed")]
    PeerClosed(String),

    #[error("diameter base error, result code {0}")]
    DiameterBase(u32),

    // ========================================
    // Client / router errors
    // ========================================
    #[error("request timed out")]
    Timeout,

    #[error("no free identifiers for {0}")]
    NoIdentifiers(String),

    #[error("no available targets in group {0}")]
    NoAvailableTargets(String),

    #[error("socket closed")]
    SocketClosed,

    #[error("handler error: {0}")]
    Handler(String),

    // ========================================
    // Startup errors (fatal)
    // ========================================
    #[error("configuration error: {0}")]
    Config(String),

    #[error("dictionary error: {0}")]
    Dictionary(String),

    // ========================================
    // Transport errors
    // ========================================
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl RadiamError {
    /// Convert error to a Diameter Result-Code for protocol-error answers
    pub fn to_result_code(&self) -> u32 {
        match self {
            Self::MalformedHeader(_) | Self::Truncated { .. } => 3008, // DIAMETER_INVALID_HDR_BITS
            Self::InvalidAvpValue { .. } => 5004, // DIAMETER_INVALID_AVP_VALUE
            Self::DiameterBase(code) => *code,
            Self::PeerNotEngaged(_)
            | Self::PeerClosed(_)
            | Self::Timeout
            | Self::NoAvailableTargets(_) => 3002, // DIAMETER_UNABLE_TO_DELIVER
            Self::NoIdentifiers(_) => 3004, // DIAMETER_TOO_BUSY
            _ => 5012,                      // DIAMETER_UNABLE_TO_COMPLY
        }
    }

    /// Whether the router may retry this failure on another target
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::PeerNotEngaged(_)
                | Self::PeerClosed(_)
                | Self::SocketClosed
                | Self::Io(_)
        )
    }
}

/// Result type alias for radiam operations
pub type Result<T> = std::result::Result<T, RadiamError>;
