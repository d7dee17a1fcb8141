/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sync_model::ErrorBody;

pub type ServerResult<T> = std::result::Result<T, ServerError>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("database unreachable")]
    Unavailable,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("error opening database: {0}")]
    OpenDatabase(#[from] sql_support::open_database::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownTable(_)
            | ServerError::BadRequest(_)
            | ServerError::MissingHeader(_)
            | ServerError::Json(_) => StatusCode::BAD_REQUEST,
            ServerError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::OpenDatabase(_) | ServerError::Storage(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("request failed: {}", self);
        } else {
            log::debug!("request rejected: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
