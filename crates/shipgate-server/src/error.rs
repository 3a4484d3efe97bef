use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use shipgate_core::error::{ControllerError, RegistryError, ServiceError, ShipgateError, SubmitError};

// ---------------------------------------------------------------------------
// Internal sentinels
// ---------------------------------------------------------------------------

/// Carries an explicit HTTP 404 through the `anyhow::Error` chain, for
/// lookups that have no core error of their own (e.g. no open session).
#[derive(Debug)]
struct NotFoundError(String);

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NotFoundError {}

#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(NotFoundError(msg.into()).into())
    }

    pub fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<NotFoundError>().is_some() {
            return StatusCode::NOT_FOUND;
        }
        if self.0.downcast_ref::<BadRequestError>().is_some() {
            return StatusCode::BAD_REQUEST;
        }
        if let Some(e) = self.0.downcast_ref::<ShipgateError>() {
            return shipgate_status(e);
        }
        if let Some(e) = self.0.downcast_ref::<ControllerError>() {
            return controller_status(e);
        }
        if let Some(e) = self.0.downcast_ref::<RegistryError>() {
            return registry_status(e);
        }
        if let Some(e) = self.0.downcast_ref::<ServiceError>() {
            return service_status(e);
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn shipgate_status(e: &ShipgateError) -> StatusCode {
    match e {
        ShipgateError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
        ShipgateError::Service(e) => service_status(e),
        ShipgateError::Controller(e) => controller_status(e),
        ShipgateError::Registry(e) => registry_status(e),
        ShipgateError::Checklist(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ShipgateError::ConfigNotFound(_)
        | ShipgateError::Io(_)
        | ShipgateError::Yaml(_)
        | ShipgateError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn controller_status(e: &ControllerError) -> StatusCode {
    match e {
        ControllerError::Conflict { .. } => StatusCode::CONFLICT,
        ControllerError::Submit(SubmitError::Conflict(_)) => StatusCode::CONFLICT,
        ControllerError::Submit(SubmitError::NotFound(_)) => StatusCode::NOT_FOUND,
        ControllerError::Submit(_) => StatusCode::BAD_GATEWAY,
        ControllerError::GateClosed { .. }
        | ControllerError::InvalidState { .. }
        | ControllerError::Checklist(_) => StatusCode::UNPROCESSABLE_ENTITY,
        // The session was replaced or closed under the caller.
        ControllerError::TornDown(_) => StatusCode::CONFLICT,
    }
}

fn registry_status(e: &RegistryError) -> StatusCode {
    match e {
        RegistryError::AlreadyRunning { .. } | RegistryError::TornDown(_) => StatusCode::CONFLICT,
    }
}

fn service_status(e: &ServiceError) -> StatusCode {
    match e {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServiceError::Http { .. } | ServiceError::Unreachable(_) | ServiceError::Decode(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
