//! Request plumbing shared by the REST backend calls.

use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::backend::BackendError;

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug)]
pub(super) struct RawResponse {
    pub(super) status: StatusCode,
    pub(super) body: Vec<u8>,
}

impl RawResponse {
    pub(super) fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    /// Decodes a successful body, or maps the failure status for `path`.
    pub(super) fn json<T: DeserializeOwned>(self, path: &str) -> Result<T, BackendError> {
        if !self.status.is_success() {
            return Err(self.into_error(path));
        }
        serde_json::from_slice(&self.body).map_err(|err| BackendError::Decode {
            message: err.to_string(),
        })
    }

    /// Maps a non-success response onto [`BackendError`].
    pub(super) fn into_error(self, path: &str) -> BackendError {
        match self.status {
            StatusCode::NOT_FOUND => BackendError::NotFound {
                path: path.to_owned(),
            },
            StatusCode::CONFLICT => BackendError::Conflict {
                message: error_message(&self.body),
            },
            status => BackendError::Status {
                status: status.as_u16(),
                message: error_message(&self.body),
            },
        }
    }
}

/// Sends the request and buffers the body.
pub(super) async fn send(builder: RequestBuilder) -> Result<RawResponse, BackendError> {
    let response = builder.send().await.map_err(transport)?;
    let status = response.status();
    let body = response.bytes().await.map_err(transport)?;
    Ok(RawResponse {
        status,
        body: body.to_vec(),
    })
}

/// Extracts `error.message` from a JSON error body, falling back to the raw
/// text.
pub(super) fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body).map_or_else(
        |_| String::from_utf8_lossy(body).trim().to_owned(),
        |parsed| parsed.error.message,
    )
}

fn transport(err: reqwest::Error) -> BackendError {
    BackendError::Transport {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn response(status: StatusCode, body: &str) -> RawResponse {
        RawResponse {
            status,
            body: body.as_bytes().to_vec(),
        }
    }

    #[rstest]
    #[case(r#"{"error":{"message":"name already in use"}}"#, "name already in use")]
    #[case("upstream exploded\n", "upstream exploded")]
    #[case(r#"{"detail":"unexpected shape"}"#, r#"{"detail":"unexpected shape"}"#)]
    fn error_message_prefers_structured_bodies(#[case] body: &str, #[case] expected: &str) {
        assert_eq!(error_message(body.as_bytes()), expected);
    }

    #[rstest]
    fn not_found_keeps_the_request_path() {
        let err = response(StatusCode::NOT_FOUND, "").into_error("/tenants/t1");
        assert_eq!(
            err,
            BackendError::NotFound {
                path: String::from("/tenants/t1"),
            }
        );
    }

    #[rstest]
    fn conflict_carries_the_backend_message() {
        let err = response(StatusCode::CONFLICT, r#"{"error":{"message":"taken"}}"#)
            .into_error("/tenants");
        assert_eq!(
            err,
            BackendError::Conflict {
                message: String::from("taken"),
            }
        );
    }

    #[rstest]
    fn other_statuses_keep_their_code() {
        let err = response(StatusCode::SERVICE_UNAVAILABLE, "try later").into_error("/tenants");
        assert_eq!(
            err,
            BackendError::Status {
                status: 503,
                message: String::from("try later"),
            }
        );
    }

    #[rstest]
    fn json_reports_undecodable_success_bodies() {
        let result: Result<serde_json::Value, _> =
            response(StatusCode::OK, "not json").json("/tenants/t1");
        assert!(matches!(result, Err(BackendError::Decode { .. })));
    }
}
