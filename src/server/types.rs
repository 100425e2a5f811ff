use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::pipeline::TrainSummary;

/// 训练请求，每个文件名（去掉扩展名）作为标签
#[derive(TryFromMultipart)]
pub struct TrainRequest {
    #[form_data(limit = "unlimited")]
    pub files: Vec<FieldData<Bytes>>,
}

/// 训练表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct TrainForm {
    /// 训练图片，可以是多张图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub files: String,
}

/// 识别请求
#[derive(TryFromMultipart)]
pub struct TestRequest {
    #[form_data(limit = "unlimited")]
    pub file: FieldData<Bytes>,
}

/// 识别表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct TestForm {
    /// 需要识别的图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 指定特征库，不填则使用默认特征库
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StoreQuery {
    #[serde(alias = "model_path")]
    pub store_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrainResponse {
    pub status: String,
    pub message: String,
    pub store_id: String,
    pub metadata: TrainSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TestResponse {
    pub status: String,
    pub predicted_class: String,
    /// 余弦相似度，范围 [-1, 1]
    pub similarity: f32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub status: String,
    pub message: String,
}

/// 错误响应
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// 固定为 error
    pub status: String,
    /// 错误类别，例如 StoreNotFound
    pub kind: String,
    pub message: String,
}
