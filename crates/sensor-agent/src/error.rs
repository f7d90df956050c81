use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum SensorAgentError {
    SqliteError(rusqlite::Error),
    JsonError(String),
    InvalidArgument(String),
    KvStore(String),
    Serialization(String),
    IO(String),
    Database(String),
    Migration(String),
    Transport(String),
    Config(String),
    NotInitialized(String),
    ShuttingDown(String),
    // 上报失败（网络、超时、服务端拒绝）
    Upload(UploadFailure),
}

impl fmt::Display for SensorAgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorAgentError::SqliteError(e) => write!(f, "SQLite error: {}", e),
            SensorAgentError::JsonError(e) => write!(f, "JSON error: {}", e),
            SensorAgentError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
            SensorAgentError::KvStore(e) => write!(f, "KV store error: {}", e),
            SensorAgentError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SensorAgentError::IO(e) => write!(f, "IO error: {}", e),
            SensorAgentError::Database(e) => write!(f, "Database error: {}", e),
            SensorAgentError::Migration(e) => write!(f, "Migration error: {}", e),
            SensorAgentError::Transport(e) => write!(f, "Transport error: {}", e),
            SensorAgentError::Config(e) => write!(f, "Config error: {}", e),
            SensorAgentError::NotInitialized(e) => write!(f, "Not initialized: {}", e),
            SensorAgentError::ShuttingDown(e) => write!(f, "Shutting down: {}", e),
            SensorAgentError::Upload(e) => write!(f, "Upload failed: {}", e),
        }
    }
}

impl std::error::Error for SensorAgentError {}

impl From<rusqlite::Error> for SensorAgentError {
    fn from(error: rusqlite::Error) -> Self {
        SensorAgentError::SqliteError(error)
    }
}

impl From<serde_json::Error> for SensorAgentError {
    fn from(error: serde_json::Error) -> Self {
        SensorAgentError::JsonError(error.to_string())
    }
}

impl From<std::io::Error> for SensorAgentError {
    fn from(error: std::io::Error) -> Self {
        SensorAgentError::IO(error.to_string())
    }
}

impl From<sled::Error> for SensorAgentError {
    fn from(error: sled::Error) -> Self {
        SensorAgentError::KvStore(error.to_string())
    }
}

impl From<UploadFailure> for SensorAgentError {
    fn from(error: UploadFailure) -> Self {
        SensorAgentError::Upload(error)
    }
}

impl SensorAgentError {
    /// 存储层错误（查询 / 删除 / KV 读写）
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            SensorAgentError::SqliteError(_)
                | SensorAgentError::Database(_)
                | SensorAgentError::KvStore(_)
                | SensorAgentError::Migration(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SensorAgentError>;

/// 单条原始记录编码失败
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("{sensor} 字段不足: 需要下标 {index}, 实际 {found} 个字段")]
    MissingField {
        sensor: &'static str,
        index: usize,
        found: usize,
    },

    #[error("未注册编码器的传感器类型: {0}")]
    Unsupported(&'static str),
}

/// RemoteSink 的失败分支
///
/// 对编排器而言所有失败都等价于「本轮结束，下次闹钟重试同一窗口」，
/// 分类仅用于日志与事件。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadFailure {
    #[error("上报超时 ({0:?})")]
    Timeout(Duration),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("服务端拒绝: HTTP {status} ({message})")]
    Rejected { status: u16, message: String },

    #[error("序列化失败: {0}")]
    Serialization(String),
}

impl UploadFailure {
    /// 判断同一批数据重发是否有意义
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadFailure::Timeout(_) => true,
            UploadFailure::Network(_) => true,
            // 5xx 与限流可重试，其他 4xx 重发同一批也会被拒
            UploadFailure::Rejected { status, .. } => *status >= 500 || *status == 429,
            UploadFailure::Serialization(_) => false,
        }
    }

    /// reqwest 错误分类；`timeout` 为客户端配置的请求超时
    pub fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            UploadFailure::Timeout(timeout)
        } else if let Some(status) = error.status() {
            UploadFailure::Rejected {
                status: status.as_u16(),
                message: error.to_string(),
            }
        } else {
            UploadFailure::Network(error.to_string())
        }
    }
}
