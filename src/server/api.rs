use std::path::Path;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum_typed_multipart::TypedMultipart;
use log::info;

use super::error::{BadRequest, Result};
use super::state::AppState;
use super::types::*;
use crate::metrics;
use crate::store::{DEFAULT_STORE_ID, StoreInfo};
use crate::utils::label_from_filename;

/// 使用上传的图片训练特征库，文件名（去掉扩展名）作为标签
#[utoipa::path(
    post,
    path = "/train",
    params(StoreQuery),
    request_body(content = TrainForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = TrainResponse),
        (status = 400, body = ErrorResponse),
    )
)]
pub async fn train_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreQuery>,
    TypedMultipart(data): TypedMultipart<TrainRequest>,
) -> Result<Json<TrainResponse>> {
    let batch = data
        .files
        .into_iter()
        .map(|file| {
            let Some(name) = file.metadata.file_name.as_deref() else {
                return Err(BadRequest("上传的文件缺少文件名".to_string()));
            };
            let label = label_from_filename(name).to_string();
            Ok((file.contents, label))
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!("收到训练请求，共 {} 张图片", batch.len());

    let summary = state
        .run_blocking(move |classifier, budget| {
            classifier.train(&batch, query.store_id.as_deref(), budget)
        })
        .await?;

    Ok(Json(TrainResponse {
        status: "success".to_string(),
        message: "训练完成".to_string(),
        store_id: summary.store_id.clone(),
        metadata: summary,
    }))
}

/// 识别一张图片
#[utoipa::path(
    post,
    path = "/test",
    params(StoreQuery),
    request_body(content = TestForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = TestResponse),
        (status = 404, body = ErrorResponse),
    )
)]
pub async fn test_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreQuery>,
    TypedMultipart(data): TypedMultipart<TestRequest>,
) -> Result<Json<TestResponse>> {
    let bytes = data.file.contents;
    let result = state
        .run_blocking(move |classifier, budget| {
            classifier.infer(&bytes, query.store_id.as_deref(), budget)
        })
        .await?;

    Ok(Json(TestResponse {
        status: "success".to_string(),
        predicted_class: result.label,
        similarity: result.similarity,
    }))
}

/// 删除特征库
#[utoipa::path(
    delete,
    path = "/clear-model",
    params(StoreQuery),
    responses(
        (status = 200, body = MessageResponse),
        (status = 404, body = ErrorResponse),
    )
)]
pub async fn clear_model_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreQuery>,
) -> Result<Json<MessageResponse>> {
    let store_id = query.store_id.unwrap_or_else(|| DEFAULT_STORE_ID.to_string());
    let message = format!("特征库 {store_id} 已删除");
    state
        .run_blocking(move |classifier, _| classifier.delete_store(Some(store_id.as_str())))
        .await?;
    Ok(Json(MessageResponse { status: "success".to_string(), message }))
}

/// 列出所有特征库
#[utoipa::path(
    get,
    path = "/models",
    responses(
        (status = 200, body = Vec<StoreInfo>),
    )
)]
pub async fn models_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<StoreInfo>>> {
    let infos = state.run_blocking(|classifier, _| classifier.list_trained_artifacts()).await?;
    Ok(Json(infos))
}

/// 下载特征库的 zip 压缩包
#[utoipa::path(
    get,
    path = "/download-model",
    params(StoreQuery),
    responses(
        (status = 200, content_type = "application/zip", body = Vec<u8>),
        (status = 404, body = ErrorResponse),
    )
)]
pub async fn download_model_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreQuery>,
) -> Result<impl IntoResponse> {
    let store_id = query.store_id.unwrap_or_else(|| DEFAULT_STORE_ID.to_string());
    let file_name = match Path::new(&store_id).file_stem() {
        Some(stem) => format!("{}.zip", stem.to_string_lossy()),
        None => "store.zip".to_string(),
    };
    let data = state
        .run_blocking(move |classifier, _| classifier.download_store(Some(store_id.as_str())))
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
        ],
        data,
    ))
}

/// 下载特征库文件本身
#[utoipa::path(
    get,
    path = "/models/{model_id}/download",
    params(("model_id" = String, Path, description = "特征库标识，即 /models 返回的 id")),
    responses(
        (status = 200, content_type = "application/octet-stream", body = Vec<u8>),
        (status = 404, body = ErrorResponse),
    )
)]
pub async fn download_raw_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(model_id): UrlPath<String>,
) -> Result<impl IntoResponse> {
    let disposition = format!("attachment; filename=\"{model_id}\"");
    let data = state
        .run_blocking(move |classifier, _| classifier.download_raw(&model_id))
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    ))
}

/// Prometheus 指标
#[utoipa::path(get, path = "/metrics", responses((status = 200, body = String)))]
pub async fn metrics_handler() -> Result<String> {
    Ok(metrics::gather_text()?)
}
