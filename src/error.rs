//! Request-level error taxonomy for `/fetch`.
//!
//! Callers can only tell three things apart: a bad request (400), a durable
//! local failure (500) and an upstream-dependent failure (502).  Response
//! bodies are fixed strings; the underlying cause is logged where it happens
//! and never relayed, since repository URLs may embed credentials.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use prometheus_client::encoding::EncodeLabelValue;

/// Why a fetch request did not produce an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    MissingRepo,
    MissingBranch,
    MissingFormat,
    UnsupportedFormat,
    /// The mirror directory could not be created or initialised.
    MirrorSetup,
    /// Forced fetch of the branch from upstream failed.
    Fetch,
    /// The freshly fetched branch could not be resolved to a commit.
    ResolveCommit,
    /// Every permitted export attempt failed.
    Archive,
}

/// Coarse outcome of a request, used as a metrics label.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Ok,
    BadRequest,
    LocalFailure,
    UpstreamFailure,
}

impl FetchError {
    pub fn status(self) -> StatusCode {
        match self.outcome() {
            Outcome::BadRequest => StatusCode::BAD_REQUEST,
            Outcome::LocalFailure => StatusCode::INTERNAL_SERVER_ERROR,
            Outcome::UpstreamFailure | Outcome::Ok => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn outcome(self) -> Outcome {
        match self {
            Self::MissingRepo
            | Self::MissingBranch
            | Self::MissingFormat
            | Self::UnsupportedFormat => Outcome::BadRequest,
            Self::MirrorSetup => Outcome::LocalFailure,
            Self::Fetch | Self::ResolveCommit | Self::Archive => Outcome::UpstreamFailure,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::MissingRepo => "Must specify repo",
            Self::MissingBranch => {
                "Must specify branch, even if you know the commit (we may need it to fetch)"
            }
            Self::MissingFormat => "Must specify format, e.g. tar",
            Self::UnsupportedFormat => "Format must be tar for now",
            Self::MirrorSetup => "Cannot create git dir",
            Self::Fetch => "Error fetching from repo",
            Self::ResolveCommit => "Error fetching latest commit from repo",
            Self::Archive => "Error running archive",
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for FetchError {}

impl IntoResponse for FetchError {
    fn into_response(self) -> Response {
        (self.status(), format!("{}\n", self.message())).into_response()
    }
}
