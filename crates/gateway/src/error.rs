use {
    axum::{
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    serde_json::json,
    switchboard_sessions::SessionError,
    tracing::{error, warn},
};

/// Handler error rendered as `{ ok: false, error, details }`.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Session(SessionError),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Session(e) => match e {
                SessionError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                SessionError::ConnectionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                SessionError::Superseded { .. } => StatusCode::CONFLICT,
                // The session is closed and a reconnect or re-pair is scheduled.
                SessionError::TerminalAuth { .. } | SessionError::TransientClose { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                },
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::Session(e) => e.code(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let details = match &self {
            Self::Validation(message) => message.clone(),
            Self::Session(e) => e.to_string(),
        };
        if status.is_server_error() {
            error!(code = self.code(), %details, "request failed");
        } else {
            warn!(code = self.code(), %details, "request rejected");
        }
        (
            status,
            Json(json!({
                "ok": false,
                "error": self.code(),
                "details": details,
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        rstest::rstest,
        std::time::Duration,
        switchboard_protocol::{CloseCause, ProtocolError},
    };

    #[rstest]
    #[case(SessionError::SessionNotFound("t1".into()), StatusCode::NOT_FOUND)]
    #[case(
        SessionError::ConnectionTimeout { id: "t1".into(), after: Duration::from_secs(1) },
        StatusCode::GATEWAY_TIMEOUT
    )]
    #[case(SessionError::Superseded { id: "t1".into(), generation: 2 }, StatusCode::CONFLICT)]
    #[case(
        SessionError::TerminalAuth { id: "t1".into(), cause: CloseCause::from_code(401, "x") },
        StatusCode::SERVICE_UNAVAILABLE
    )]
    #[case(
        SessionError::TransientClose { id: "t1".into(), cause: CloseCause::from_code(428, "x") },
        StatusCode::SERVICE_UNAVAILABLE
    )]
    #[case(
        SessionError::protocol("t1", ProtocolError::connection_closed()),
        StatusCode::INTERNAL_SERVER_ERROR
    )]
    #[case(SessionError::Store("disk full".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn session_errors_map_to_status(#[case] error: SessionError, #[case] expected: StatusCode) {
        assert_eq!(ApiError::from(error).status_code(), expected);
    }

    #[test]
    fn validation_is_bad_request() {
        let err = ApiError::validation("missing 'to'");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "VALIDATION");
    }
}
