use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use rmcp::ErrorData;
use serde::Serialize;
use thiserror::Error;
use utoipa::{IntoResponses, PartialSchema, ToSchema};

pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug, Serialize)]
pub enum GatewayError {
    #[error("user is not authenticated to perform this action.")]
    Authentication {
        msg: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("user is not authorized to perform this action.")]
    Authorization {
        msg: String,
        #[serde(skip)]
        #[source]
        source: anyhow::Error,
    },
    #[error("could not find resource")]
    NotFound {
        msg: String,
        lookup_id: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("unknown error")]
    Unknown(
        #[serde(skip)]
        #[from]
        anyhow::Error,
    ),
    #[error("invalid request")]
    InvalidRequest {
        msg: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("invalid response")]
    InvalidResponse {
        msg: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("upstream unavailable")]
    UpstreamUnavailable {
        upstream_id: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("invalid or expired session token")]
    InvalidSessionToken { msg: String },
    #[error("tokio channel error")]
    TokioChannelError {
        #[serde(skip)]
        #[source]
        source: DynError,
    },
    #[error("io error")]
    IoError {
        #[serde(skip)]
        #[from]
        #[source]
        source: std::io::Error,
    },
    #[error("url parse error")]
    UrlParseError {
        #[serde(skip)]
        #[from]
        #[source]
        source: url::ParseError,
    },
    #[error("serde json error")]
    SerdeSerializationError {
        #[serde(skip)]
        #[from]
        #[source]
        source: serde_json::Error,
    },
    #[error("axum error")]
    AxumError {
        #[serde(skip)]
        #[from]
        #[source]
        source: axum::Error,
    },
    #[error("address parse error")]
    AddrParseError {
        #[serde(skip)]
        #[from]
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("var error")]
    VarError {
        #[serde(skip)]
        #[from]
        #[source]
        source: std::env::VarError,
    },
    #[error("reqwest error")]
    ReqwestError {
        #[serde(skip)]
        #[from]
        #[source]
        source: reqwest::Error,
    },
    #[error("jwt error")]
    JwtError {
        #[serde(skip)]
        #[from]
        #[source]
        source: jsonwebtoken::errors::Error,
    },
}

impl<T: Send + Sync + 'static> From<tokio::sync::mpsc::error::SendError<T>> for GatewayError {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GatewayError::TokioChannelError {
            source: Box::new(e),
        }
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for GatewayError {
    fn from(e: tokio::sync::oneshot::error::RecvError) -> Self {
        GatewayError::TokioChannelError {
            source: Box::new(e),
        }
    }
}

impl<T: Send + Sync + 'static + std::fmt::Debug> From<tokio::sync::broadcast::error::SendError<T>>
    for GatewayError
{
    fn from(e: tokio::sync::broadcast::error::SendError<T>) -> Self {
        GatewayError::TokioChannelError {
            source: Box::new(e),
        }
    }
}

impl From<tokio::sync::broadcast::error::RecvError> for GatewayError {
    fn from(e: tokio::sync::broadcast::error::RecvError) -> Self {
        GatewayError::TokioChannelError {
            source: Box::new(e),
        }
    }
}

impl From<GatewayError> for tonic::Status {
    fn from(error: GatewayError) -> Self {
        let code = match error {
            GatewayError::Authentication { .. } | GatewayError::InvalidSessionToken { .. } => {
                tonic::Code::Unauthenticated
            }
            GatewayError::Authorization { .. } => tonic::Code::PermissionDenied,
            GatewayError::NotFound { .. } => tonic::Code::NotFound,
            GatewayError::InvalidRequest { .. } => tonic::Code::InvalidArgument,
            GatewayError::UpstreamUnavailable { .. } => tonic::Code::Unavailable,
            _ => tonic::Code::Internal,
        };
        tonic::Status::new(code, error.to_string())
    }
}

impl ToSchema for GatewayError {
    fn name() -> std::borrow::Cow<'static, str> {
        std::borrow::Cow::Borrowed("Error")
    }

    fn schemas(
        _schemas: &mut Vec<(
            String,
            utoipa::openapi::RefOr<utoipa::openapi::schema::Schema>,
        )>,
    ) {
        // nothing by default
    }
}

impl PartialSchema for GatewayError {
    fn schema() -> utoipa::openapi::RefOr<utoipa::openapi::schema::Schema> {
        utoipa::openapi::ObjectBuilder::new()
            .property(
                "name",
                utoipa::openapi::ObjectBuilder::new()
                    .schema_type(utoipa::openapi::schema::Type::String),
            )
            .required("name")
            .property(
                "message",
                utoipa::openapi::ObjectBuilder::new()
                    .schema_type(utoipa::openapi::schema::Type::String),
            )
            .required("message")
            .into()
    }
}

impl IntoResponses for GatewayError {
    fn responses() -> std::collections::BTreeMap<
        String,
        utoipa::openapi::RefOr<utoipa::openapi::response::Response>,
    > {
        let mut responses = std::collections::BTreeMap::new();

        let error_content = utoipa::openapi::ContentBuilder::new()
            .schema(Some(GatewayError::schema()))
            .build();

        responses.insert(
            "401".to_string(),
            utoipa::openapi::ResponseBuilder::new()
                .description("Authentication error")
                .content("application/json", error_content.clone())
                .into(),
        );
        responses.insert(
            "403".to_string(),
            utoipa::openapi::ResponseBuilder::new()
                .description("Authorization error")
                .content("application/json", error_content.clone())
                .into(),
        );
        responses.insert(
            "404".to_string(),
            utoipa::openapi::ResponseBuilder::new()
                .description("Resource not found")
                .content("application/json", error_content.clone())
                .into(),
        );
        responses.insert(
            "400".to_string(),
            utoipa::openapi::ResponseBuilder::new()
                .description("Invalid request")
                .content("application/json", error_content.clone())
                .into(),
        );
        responses.insert(
            "503".to_string(),
            utoipa::openapi::ResponseBuilder::new()
                .description("Upstream unavailable")
                .content("application/json", error_content.clone())
                .into(),
        );
        responses.insert(
            "500".to_string(),
            utoipa::openapi::ResponseBuilder::new()
                .description("Server error")
                .content("application/json", error_content)
                .into(),
        );

        responses
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match self {
            GatewayError::Authentication { .. } | GatewayError::InvalidSessionToken { .. } => {
                StatusCode::UNAUTHORIZED
            }
            GatewayError::Authorization { .. } => StatusCode::FORBIDDEN,
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::InvalidResponse { .. }
            | GatewayError::Unknown(_)
            | GatewayError::TokioChannelError { .. }
            | GatewayError::IoError { .. }
            | GatewayError::SerdeSerializationError { .. }
            | GatewayError::UrlParseError { .. }
            | GatewayError::AxumError { .. }
            | GatewayError::VarError { .. }
            | GatewayError::ReqwestError { .. }
            | GatewayError::JwtError { .. }
            | GatewayError::AddrParseError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            name: match self {
                GatewayError::Authentication { .. } => "Authentication",
                GatewayError::Authorization { .. } => "Authorization",
                GatewayError::NotFound { .. } => "NotFound",
                GatewayError::InvalidRequest { .. } => "InvalidRequest",
                GatewayError::InvalidResponse { .. } => "InvalidResponse",
                GatewayError::UpstreamUnavailable { .. } => "UpstreamUnavailable",
                GatewayError::InvalidSessionToken { .. } => "InvalidSessionToken",
                GatewayError::Unknown(_) => "InternalServerError",
                GatewayError::TokioChannelError { .. } => "InternalServerError",
                GatewayError::IoError { .. } => "InternalServerError",
                GatewayError::SerdeSerializationError { .. } => "InternalServerError",
                GatewayError::UrlParseError { .. } => "InternalServerError",
                GatewayError::AxumError { .. } => "InternalServerError",
                GatewayError::AddrParseError { .. } => "InternalServerError",
                GatewayError::VarError { .. } => "InternalServerError",
                GatewayError::ReqwestError { .. } => "InternalServerError",
                GatewayError::JwtError { .. } => "InternalServerError",
            }
            .to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    name: String,
    message: String,
}

impl From<GatewayError> for ErrorData {
    fn from(error: GatewayError) -> ErrorData {
        match error {
            GatewayError::NotFound {
                msg,
                lookup_id: _,
                source: _,
            } => ErrorData::resource_not_found(msg, None),
            GatewayError::InvalidRequest { msg, source: _ } => {
                ErrorData::invalid_request(msg, None)
            }
            GatewayError::Authentication { .. }
            | GatewayError::Authorization { .. }
            | GatewayError::InvalidResponse { .. }
            | GatewayError::UpstreamUnavailable { .. }
            | GatewayError::InvalidSessionToken { .. }
            | GatewayError::Unknown(_)
            | GatewayError::TokioChannelError { .. }
            | GatewayError::IoError { .. }
            | GatewayError::SerdeSerializationError { .. }
            | GatewayError::AxumError { .. }
            | GatewayError::UrlParseError { .. }
            | GatewayError::AddrParseError { .. }
            | GatewayError::VarError { .. }
            | GatewayError::ReqwestError { .. }
            | GatewayError::JwtError { .. } => ErrorData::internal_error(error.to_string(), None),
        }
    }
}
