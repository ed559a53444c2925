use std::fmt::Display;

/// Direction of a PUS packet through the ground segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Uplink telecommand
    Telecommand,
    /// Downlink telemetry
    Telemetry,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Telecommand => write!(f, "TC"),
            Direction::Telemetry => write!(f, "TM"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Malformed frame or packet data, e.g., a packet length beyond the configured maximum.
    #[error("framing error: {0}")]
    Framing(String),

    /// Reed-Solomon decoding found more errors than the code can correct.
    #[error("uncorrectable Reed-Solomon codeblock")]
    UncorrectableFec,

    #[error("unknown PUS service {0}")]
    UnknownService(u8),
    #[error("unknown PUS sub-service ({service},{subservice})")]
    UnknownSubService { service: u8, subservice: u8 },
    #[error("PUS sub-service ({service},{subservice}) does not support {direction}")]
    UnsupportedDirection {
        service: u8,
        subservice: u8,
        direction: Direction,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not enough bytes")]
    NotEnoughData { actual: usize, minimum: usize },

    #[error("Invalid timecode config: {0}")]
    TimecodeConfig(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("Overflow")]
    Overflow,

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
