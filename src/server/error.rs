use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::{error, warn};

use super::types::ErrorResponse;
use crate::error::ClassifyError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

/// 请求本身不合法，例如缺少文件名
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct BadRequest(pub String);

/// 根据根错误的类别决定 HTTP 状态码
pub fn status_of(err: &ClassifyError) -> StatusCode {
    match err.root() {
        ClassifyError::Decode(_)
        | ClassifyError::Shape(_)
        | ClassifyError::InvalidStoreId(_)
        | ClassifyError::EmptyBatch => StatusCode::BAD_REQUEST,
        ClassifyError::StoreNotFound(_) => StatusCode::NOT_FOUND,
        ClassifyError::Timeout => StatusCode::REQUEST_TIMEOUT,
        ClassifyError::IncompatibleStore { .. }
        | ClassifyError::EmptyStore
        | ClassifyError::DegenerateVector(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        if let Some(err) = self.0.downcast_ref::<ClassifyError>() {
            (status_of(err), err.root().kind())
        } else if self.0.downcast_ref::<BadRequest>().is_some() {
            (StatusCode::BAD_REQUEST, "BadRequest")
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = self.parts();
        if status.is_server_error() {
            error!("请求失败: {:#}", self.0);
        } else {
            warn!("请求失败: {:#}", self.0);
        }
        let body = ErrorResponse {
            status: "error".to_string(),
            kind: kind.to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
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
