use std::path::PathBuf;

use thiserror::Error;

use crate::parser::extract::SectionRole;

/// Failure of a call to one of the external services.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{service} returned {status}: {body}")]
    Upstream {
        service: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{service} request timed out")]
    Timeout { service: &'static str },

    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed response from {service}: {detail}")]
    MalformedResponse {
        service: &'static str,
        detail: String,
    },

    #[error("video generation failed: {0}")]
    VideoFailed(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    pub fn malformed(service: &'static str, detail: impl Into<String>) -> Self {
        ApiError::MalformedResponse {
            service,
            detail: detail.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ApiError::Io {
            context: context.into(),
            source,
        }
    }

    /// Map a reqwest error, keeping timeouts as their own kind.
    pub fn from_reqwest(service: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            ApiError::Timeout { service }
        } else {
            ApiError::Transport { service, source }
        }
    }
}

/// Failure of one document inside the script pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to partition {path}: {reason}")]
    Partition { path: PathBuf, reason: String },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{role} extraction returned unusable text: {reason}")]
    UncleanSection { role: SectionRole, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_service() {
        let e = ApiError::malformed("openai", "expected JSON");
        assert_eq!(e.to_string(), "malformed response from openai: expected JSON");

        let e = ApiError::Timeout { service: "heygen" };
        assert_eq!(e.to_string(), "heygen request timed out");
    }

    #[test]
    fn pipeline_error_is_transparent_over_api_error() {
        let e: PipelineError = ApiError::VideoFailed("bad avatar".into()).into();
        assert_eq!(e.to_string(), "video generation failed: bad avatar");
    }
}
