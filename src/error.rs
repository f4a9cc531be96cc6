// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors raised by the wallet data pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Invalid address or ENS name: {0}")]
    InvalidAddress(String),

    #[error("Alchemy API error: {0}")]
    Upstream(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<reqwest::Error> for WalletError {
    fn from(e: reqwest::Error) -> Self {
        WalletError::Upstream(e.to_string())
    }
}

/// Errors surfaced by the HTTP layer.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<eyre::Report> for AppError {
    fn from(e: eyre::Report) -> Self {
        AppError::Internal(format!("{e:#}"))
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Wallet(WalletError::InvalidAddress(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_ADDRESS")
            }
            AppError::Wallet(WalletError::InvalidParameter(_)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST")
            }
            AppError::Wallet(WalletError::Upstream(_)) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            AppError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;
