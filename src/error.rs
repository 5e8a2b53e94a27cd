//! Error taxonomy shared by the adapters, the pure stages and the orchestrator.

use std::fmt;
use thiserror::Error;

/// Failures an external service adapter may report. Provider-specific error
/// shapes are mapped into one of these at the adapter boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("{service} rate limited the request: {message}")]
    RateLimited { service: &'static str, message: String },

    #[error("{service} rejected the credentials: {message}")]
    Unauthorized { service: &'static str, message: String },

    #[error("{service} is unavailable: {message}")]
    Unavailable { service: &'static str, message: String },

    #[error("{service} returned an invalid response: {message}")]
    InvalidResponse { service: &'static str, message: String },
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::RateLimited { .. } => ErrorKind::RateLimited,
            ServiceError::Unauthorized { .. } => ErrorKind::Unauthorized,
            ServiceError::Unavailable { .. } => ErrorKind::Unavailable,
            ServiceError::InvalidResponse { .. } => ErrorKind::InvalidResponse,
        }
    }

    pub fn service(&self) -> &'static str {
        match self {
            ServiceError::RateLimited { service, .. }
            | ServiceError::Unauthorized { service, .. }
            | ServiceError::Unavailable { service, .. }
            | ServiceError::InvalidResponse { service, .. } => service,
        }
    }
}

/// Any failure that can end (or pause) a pipeline stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("script contained no usable sentences")]
    EmptyScript,

    #[error("no media candidates for segment {segment} after {attempts} queries")]
    InsufficientMedia { segment: usize, attempts: u32 },

    #[error("timeline of {actual:.2}s cannot fit the [{min:.0}, {max:.0}]s bound")]
    DurationOutOfBounds { actual: f64, min: f64, max: f64 },

    #[error("export failed: {0}")]
    Export(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Service(e) => e.kind(),
            PipelineError::EmptyScript => ErrorKind::EmptyScript,
            PipelineError::InsufficientMedia { .. } => ErrorKind::InsufficientMedia,
            PipelineError::DurationOutOfBounds { .. } => ErrorKind::DurationOutOfBounds,
            PipelineError::Export(_) => ErrorKind::Export,
        }
    }

    /// Transient failures are retried by the orchestrator with backoff.
    pub fn is_recoverable(&self) -> bool {
        self.kind().is_recoverable()
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Export(e.to_string())
    }
}

impl From<hound::Error> for PipelineError {
    fn from(e: hound::Error) -> Self {
        PipelineError::Export(e.to_string())
    }
}

/// Flat reason code attached to failed runs and progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimited,
    Unauthorized,
    Unavailable,
    InvalidResponse,
    EmptyScript,
    InsufficientMedia,
    DurationOutOfBounds,
    Export,
}

impl ErrorKind {
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Unavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::InvalidResponse => "InvalidResponse",
            ErrorKind::EmptyScript => "EmptyScript",
            ErrorKind::InsufficientMedia => "InsufficientMedia",
            ErrorKind::DurationOutOfBounds => "DurationOutOfBounds",
            ErrorKind::Export => "Export",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_recoverable() {
        let limited = PipelineError::from(ServiceError::RateLimited {
            service: "pexels",
            message: "slow down".to_string(),
        });
        let down = PipelineError::from(ServiceError::Unavailable {
            service: "openai",
            message: "502".to_string(),
        });
        assert!(limited.is_recoverable());
        assert!(down.is_recoverable());
    }

    #[test]
    fn content_and_auth_kinds_are_terminal() {
        let auth = PipelineError::from(ServiceError::Unauthorized {
            service: "openai",
            message: "bad key".to_string(),
        });
        assert!(!auth.is_recoverable());
        assert!(!PipelineError::EmptyScript.is_recoverable());
        assert!(
            !PipelineError::InsufficientMedia {
                segment: 2,
                attempts: 3
            }
            .is_recoverable()
        );
        assert_eq!(auth.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn display_names_service_and_reason() {
        let err = ServiceError::InvalidResponse {
            service: "pexels",
            message: "missing videos".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "pexels returned an invalid response: missing videos"
        );
        assert_eq!(
            PipelineError::InsufficientMedia {
                segment: 0,
                attempts: 3
            }
            .to_string(),
            "no media candidates for segment 0 after 3 queries"
        );
        assert_eq!(ErrorKind::DurationOutOfBounds.to_string(), "DurationOutOfBounds");
    }
}
