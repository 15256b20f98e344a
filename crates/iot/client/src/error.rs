//! HTTP status failures.

/// A collaborator answered with an unsuccessful HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("http request failed with status {status}")]
pub struct HttpError {
    pub status: u16,
}

impl HttpError {
    pub fn new(status: u16) -> Self {
        Self { status }
    }

    /// Whether the peer reported a missing resource.
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Fail on statuses of 400 and above.
pub(crate) fn check_status(rsp: reqwest::Response) -> Result<reqwest::Response, HttpError> {
    let status = rsp.status().as_u16();
    if status >= 400 {
        return Err(HttpError::new(status));
    }
    Ok(rsp)
}

/// Status of a report's [`HttpError`] cause, if any.
pub fn http_status(report: &color_eyre::eyre::Report) -> Option<u16> {
    iot_core::find_cause::<HttpError>(report).map(|e| e.status)
}
