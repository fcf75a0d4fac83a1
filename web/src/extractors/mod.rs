pub(crate) mod remote_session;

use axum::http::StatusCode;

type RejectionType = (StatusCode, String);
