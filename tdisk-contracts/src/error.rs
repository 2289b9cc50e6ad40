// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TdiskErrorKind {
    /// Device, composite disk or file unknown to the query
    NotFound,

    /// Sector or offset beyond capacity
    OutOfRange,

    /// The operation requires a reachable device that currently is not
    DeviceOffline,

    /// Chunked-upload token past its deadline; not retryable as-is
    SessionExpired,

    /// Plugin worker not responding to liveness probes
    Unavailable,

    /// Malformed input, e.g. blocksize mismatch across members
    Invalid,

    Internal,
}

impl TdiskErrorKind {
    pub fn code(self) -> u16 {
        match self {
            Self::Invalid => 400,
            Self::NotFound => 404,
            Self::SessionExpired => 410,
            Self::OutOfRange => 416,
            Self::Internal => 500,
            Self::Unavailable => 503,
            Self::DeviceOffline => 521,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct TdiskError {
    pub kind: TdiskErrorKind,
    pub message: String,
}

impl TdiskError {
    pub fn new(kind: TdiskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TdiskErrorKind::NotFound, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(TdiskErrorKind::OutOfRange, message)
    }

    pub fn offline(message: impl Into<String>) -> Self {
        Self::new(TdiskErrorKind::DeviceOffline, message)
    }

    pub fn session_expired(message: impl Into<String>) -> Self {
        Self::new(TdiskErrorKind::SessionExpired, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(TdiskErrorKind::Unavailable, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(TdiskErrorKind::Invalid, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(TdiskErrorKind::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tdisk_error_roundtrips() {
        let error = TdiskError::out_of_range("sector 9000 beyond capacity");
        let json = serde_json::to_string(&error).expect("serialize error");
        let parsed: TdiskError = serde_json::from_str(&json).expect("deserialize error");
        assert_eq!(parsed, error);
    }

    #[test]
    fn error_kind_codes_are_stable() {
        assert_eq!(TdiskErrorKind::Invalid.code(), 400);
        assert_eq!(TdiskErrorKind::NotFound.code(), 404);
        assert_eq!(TdiskErrorKind::SessionExpired.code(), 410);
        assert_eq!(TdiskErrorKind::OutOfRange.code(), 416);
        assert_eq!(TdiskErrorKind::Internal.code(), 500);
        assert_eq!(TdiskErrorKind::Unavailable.code(), 503);
        assert_eq!(TdiskErrorKind::DeviceOffline.code(), 521);
    }
}
