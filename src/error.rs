// 错误处理模块

use thiserror::Error;
use serde::Serialize;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("不支持的音频格式: {0}")]
    UnsupportedFormat(String),

    #[error("音频数据损坏: {0}")]
    CorruptAudio(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("曲目已存在: {0}")]
    DuplicateTrack(String),

    #[error("指纹索引损坏: {0}")]
    IndexCorruption(String),

    #[error("未找到: {0}")]
    NotFound(String),

    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("后台任务失败: {0}")]
    Task(String),
}

/// 结构化错误类别，供边界层映射为状态码
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    CorruptAudio,
    Timeout,
    DuplicateTrack,
    IndexCorruption,
    NotFound,
    Storage,
    Config,
    InvalidArgument,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            AppError::CorruptAudio(_) => ErrorKind::CorruptAudio,
            AppError::Timeout(_) => ErrorKind::Timeout,
            AppError::DuplicateTrack(_) => ErrorKind::DuplicateTrack,
            AppError::IndexCorruption(_) => ErrorKind::IndexCorruption,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Database(_) | AppError::Io(_) => ErrorKind::Storage,
            AppError::Json(_) | AppError::Config(_) => ErrorKind::Config,
            AppError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            AppError::Task(_) => ErrorKind::Internal,
        }
    }
}

// 实现 Serialize 以便在边界层直接输出错误
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
