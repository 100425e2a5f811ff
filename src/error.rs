use thiserror::Error;

pub type Result<T, E = ClassifyError> = std::result::Result<T, E>;

/// 分类流程中的所有错误
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// 图片无法解码
    #[error("图片解码失败: {0}")]
    Decode(String),

    /// 张量或描述符形状不匹配
    #[error("形状不匹配: {0}")]
    Shape(String),

    #[error("特征库不存在: {0}")]
    StoreNotFound(String),

    #[error("特征库 {id} 已损坏: {reason}")]
    StoreCorrupt { id: String, reason: String },

    /// 特征库由其他特征提取器生成
    #[error("特征库由 {found} 生成，当前特征提取器为 {expected}")]
    IncompatibleStore { expected: String, found: String },

    #[error("无效的特征库名称: {0:?}")]
    InvalidStoreId(String),

    #[error("特征库为空")]
    EmptyStore,

    /// 模长为 0 的描述符，`None` 表示查询描述符
    #[error("描述符模长为 0: {}", .0.as_deref().unwrap_or("<query>"))]
    DegenerateVector(Option<String>),

    #[error("训练集为空")]
    EmptyBatch,

    #[error("执行超时")]
    Timeout,

    #[error("任务已取消")]
    Cancelled,

    /// 模型加载或推理失败
    #[error("模型错误: {0}")]
    Model(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("训练失败: {0}")]
    TrainingFailed(#[source] Box<ClassifyError>),

    #[error("推理失败: {0}")]
    InferenceFailed(#[source] Box<ClassifyError>),
}

impl ClassifyError {
    /// 错误类别名称，用于 API 响应
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "DecodeError",
            Self::Shape(_) => "ShapeError",
            Self::StoreNotFound(_) => "StoreNotFound",
            Self::StoreCorrupt { .. } => "StoreCorrupt",
            Self::IncompatibleStore { .. } => "IncompatibleStore",
            Self::InvalidStoreId(_) => "InvalidStoreId",
            Self::EmptyStore => "EmptyStore",
            Self::DegenerateVector(_) => "DegenerateVector",
            Self::EmptyBatch => "EmptyBatch",
            Self::Timeout => "Timeout",
            Self::Cancelled => "Cancelled",
            Self::Model(_) => "ModelError",
            Self::Io(_) => "IoError",
            Self::TrainingFailed(_) => "TrainingFailed",
            Self::InferenceFailed(_) => "InferenceFailed",
        }
    }

    /// 沿着 TrainingFailed / InferenceFailed 找到最初的错误
    pub fn root(&self) -> &ClassifyError {
        match self {
            Self::TrainingFailed(inner) | Self::InferenceFailed(inner) => inner.root(),
            other => other,
        }
    }

    pub(crate) fn training(self) -> Self {
        match self {
            Self::TrainingFailed(_) => self,
            other => Self::TrainingFailed(Box::new(other)),
        }
    }

    pub(crate) fn inference(self) -> Self {
        match self {
            Self::InferenceFailed(_) => self,
            other => Self::InferenceFailed(Box::new(other)),
        }
    }
}

impl From<opencv::Error> for ClassifyError {
    fn from(err: opencv::Error) -> Self {
        Self::Model(err.to_string())
    }
}
