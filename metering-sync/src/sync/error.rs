use time::Date;

use crate::{
    store::StoreError,
    upstream::{error_detail, PayloadError, TransportError, UpstreamResponse},
};

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// 403: consent revoked or token refused. Ends the run.
    #[error("upstream refused access (status {status}): {description}")]
    UpstreamForbidden { status: u16, description: String },
    /// 400 / 409: the request itself is refused. Ends the run.
    #[error("upstream rejected the request (status {status}): {description}")]
    UpstreamRejected { status: u16, description: String },
    #[error("upstream answered with status {status}: {description}")]
    UpstreamStatus { status: u16, description: String },
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] TransportError),
    #[error("malformed upstream payload: {0}")]
    MalformedPayload(#[from] PayloadError),
    #[error("no data available upstream for {0}")]
    NoDataForDate(Date),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Fatal errors stop the current run; the others only skip a window.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UpstreamForbidden { .. } | Self::UpstreamRejected { .. } | Self::Store(_)
        )
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::UpstreamForbidden { status, .. }
            | Self::UpstreamRejected { status, .. }
            | Self::UpstreamStatus { status, .. } => Some(*status),
            Self::MalformedPayload(_) => Some(200),
            _ => None,
        }
    }

    /// Classify a non-200 answer.
    pub fn from_status(response: &UpstreamResponse) -> Self {
        let status = response.status_code;
        let detail = error_detail(&response.body);
        match status {
            403 => Self::UpstreamForbidden {
                status,
                description: detail.unwrap_or_else(|| "access forbidden".to_string()),
            },
            400 | 409 => Self::UpstreamRejected {
                status,
                description: detail.unwrap_or_else(|| "request rejected".to_string()),
            },
            _ => Self::UpstreamStatus {
                status,
                description: detail.unwrap_or_else(|| truncate(&response.body, 200)),
            },
        }
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "unknown error".to_string();
    }
    trimmed.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_and_rejected_are_fatal() {
        let forbidden = SyncError::from_status(&UpstreamResponse::new(403, r#"{"detail": "no consent"}"#));
        assert!(forbidden.is_fatal());
        assert_eq!(forbidden.status_code(), Some(403));
        assert!(forbidden.to_string().contains("no consent"));

        for status in [400, 409] {
            let err = SyncError::from_status(&UpstreamResponse::new(status, ""));
            assert!(matches!(err, SyncError::UpstreamRejected { .. }));
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn other_statuses_are_not_fatal() {
        for status in [404, 429, 500, 502, 503] {
            let err = SyncError::from_status(&UpstreamResponse::new(status, "<html>oops</html>"));
            assert!(matches!(err, SyncError::UpstreamStatus { .. }), "status {status}");
            assert!(!err.is_fatal());
        }
        assert!(!SyncError::UpstreamUnavailable(TransportError("timeout".into())).is_fatal());
        assert!(!SyncError::MalformedPayload(PayloadError::MissingMeterReading).is_fatal());
    }

    #[test]
    fn status_description_falls_back_to_trimmed_body() {
        let err = SyncError::from_status(&UpstreamResponse::new(500, "  internal error \n"));
        match err {
            SyncError::UpstreamStatus { description, .. } => assert_eq!(description, "internal error"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
