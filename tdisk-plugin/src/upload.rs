// SPDX-License-Identifier: GPL-3.0-only

//! Chunked uploads with expiring sessions.
//!
//! Some backends only accept large payloads split into bounded chunks,
//! each appended under an upload-session token. A session is invalid past
//! its expiry deadline and cannot be resumed: `SessionExpired` is a
//! distinct failure requiring a fresh session, not a retryable transient
//! error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tdisk_contracts::TdiskError;

/// One upload session as issued by the backend
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub token: Uuid,
    pub expires: DateTime<Utc>,

    /// Bytes appended so far
    pub offset: u64,
}

impl UploadSession {
    pub fn new(expires: DateTime<Utc>) -> Self {
        Self {
            token: Uuid::new_v4(),
            expires,
            offset: 0,
        }
    }

    pub fn expired(&self) -> bool {
        Utc::now() >= self.expires
    }
}

/// Backend-specific transport for session-based uploads.
///
/// The wire format of any concrete provider is out of scope; implementors
/// adapt this trait to their API.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn start_session(&self) -> Result<UploadSession, TdiskError>;

    /// Appends one chunk at `session.offset` and advances the offset
    async fn append_chunk(
        &self,
        session: &mut UploadSession,
        chunk: &[u8],
    ) -> Result<(), TdiskError>;

    /// Finalizes the session; the token is spent afterwards
    async fn commit(&self, session: UploadSession) -> Result<(), TdiskError>;
}

/// Splits payloads into bounded chunks over an [`UploadTransport`]
pub struct ChunkedUploader<T> {
    transport: T,
    max_chunk: usize,
}

impl<T: UploadTransport> ChunkedUploader<T> {
    pub fn new(transport: T, max_chunk: usize) -> Self {
        Self {
            transport,
            max_chunk: max_chunk.max(1),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Uploads `payload` under one fresh session. An expired session
    /// aborts with `SessionExpired`; the caller must start over with a
    /// new call, there is no resume.
    pub async fn upload(&self, payload: &[u8]) -> Result<(), TdiskError> {
        let mut session = self.transport.start_session().await?;

        for chunk in payload.chunks(self.max_chunk) {
            if session.expired() {
                return Err(TdiskError::session_expired(format!(
                    "upload session {} expired at {} with {} bytes sent",
                    session.token, session.expires, session.offset
                )));
            }

            self.transport.append_chunk(&mut session, chunk).await?;
        }

        if session.expired() {
            return Err(TdiskError::session_expired(format!(
                "upload session {} expired before commit",
                session.token
            )));
        }

        self.transport.commit(session).await
    }
}
