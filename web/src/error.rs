//! Error handling for the web layer.
//! Broker errors are translated here so that `web` can return appropriate
//! HTTP status codes and messages to the client.
use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use log::*;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Broker(sse::Error),
    Web(WebErrorKind),
}

#[derive(Debug)]
pub enum WebErrorKind {
    Input,
    Other,
}

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::Broker(_) => {
                warn!(
                    "Error::Broker: Responding with 500 Internal Server Error. Error: {self:?}"
                );
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
            }
            Error::Web(WebErrorKind::Input) => {
                warn!("WebErrorKind::Input: Responding with 400 Bad Request. Error: {self:?}");
                (StatusCode::BAD_REQUEST, "BAD REQUEST").into_response()
            }
            Error::Web(WebErrorKind::Other) => {
                warn!(
                    "WebErrorKind::Other: Responding with 500 Internal Server Error. Error: {self:?}"
                );
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
            }
        }
    }
}

impl From<sse::Error> for Error {
    fn from(err: sse::Error) -> Self {
        Error::Broker(err)
    }
}
