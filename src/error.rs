use std::fmt;

use crate::modes::HvacMode;

#[derive(Debug)]
pub enum Error {
    // Authentication
    InvalidCredentials,
    Unreachable(reqwest::Error),
    UnexpectedStatus { status: u16, body: String },
    // API
    Rejected { status: u16, body: String },
    Timeout,
    Malformed(String),
    // Telemetry parsing
    MissingField(&'static str),
    TypeMismatch { field: String, expected: &'static str },
    // Coordination
    UnsupportedMode(HvacMode),
    UnknownProgram(String),
    Detached,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidCredentials => write!(f, "invalid credentials"),
            Error::Unreachable(e) => write!(f, "device unreachable: {e}"),
            Error::UnexpectedStatus { status, body } => {
                write!(f, "unexpected login status {status}: {body}")
            }
            Error::Rejected { status, body } => write!(f, "request rejected ({status}): {body}"),
            Error::Timeout => write!(f, "request timed out"),
            Error::Malformed(msg) => write!(f, "malformed response: {msg}"),
            Error::MissingField(field) => write!(f, "missing field: {field}"),
            Error::TypeMismatch { field, expected } => {
                write!(f, "field {field}: expected {expected}")
            }
            Error::UnsupportedMode(mode) => write!(f, "mode not offered by device: {mode}"),
            Error::UnknownProgram(program) => write!(f, "unknown program: {program}"),
            Error::Detached => write!(f, "coordinator stopped"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Unreachable(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::Unreachable(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
