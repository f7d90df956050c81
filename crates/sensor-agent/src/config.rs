//! 采集代理配置
//!
//! 时长字段统一以秒存储，便于配置文件（JSON）直接读写。

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device_info::DeviceIdentifiers;
use crate::error::{Result, SensorAgentError};
use crate::sensor_type::SensorType;

/// 默认闹钟周期：10 分钟
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10 * 60;
/// 默认单批窗口跨度：3 分钟
pub const DEFAULT_FIXED_WINDOW_SECS: u64 = 3 * 60;
/// 默认单次上报超时
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 60;

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(30),
            request_timeout_secs: Some(DEFAULT_UPLOAD_TIMEOUT_SECS),
        }
    }
}

/// 编码失败记录的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// 保留在本地缓冲中，不上报也不删除（留待人工排查）
    #[default]
    Retain,
    /// 随所在窗口一起删除
    Drop,
}

/// 采集代理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// 数据存储目录（sensor_data.db 与 kv/）
    pub data_dir: PathBuf,
    /// 闹钟周期（秒）
    pub sync_interval_secs: u64,
    /// 单批窗口跨度（秒）
    pub fixed_window_secs: u64,
    /// 单次上报超时（秒），超时按网络失败处理
    pub upload_timeout_secs: u64,
    /// 上报地址
    pub upload_url: String,
    /// 上报鉴权 token（Bearer）
    pub auth_token: Option<String>,
    /// HTTP 客户端配置
    pub http_client_config: HttpClientConfig,
    /// 是否上报设备标识（每次安装仅一次）
    pub identifiers_enabled: bool,
    /// 允许写入缓冲的传感器类型
    pub enabled_sensors: BTreeSet<SensorType>,
    /// 编码失败记录处理策略
    pub malformed_policy: MalformedPolicy,
    /// 固定设备标识；None 时从系统读取
    pub device_profile: Option<DeviceIdentifiers>,
    /// 事件广播缓冲区大小
    pub event_buffer_size: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            fixed_window_secs: DEFAULT_FIXED_WINDOW_SECS,
            upload_timeout_secs: DEFAULT_UPLOAD_TIMEOUT_SECS,
            upload_url: String::new(),
            auth_token: None,
            http_client_config: HttpClientConfig::default(),
            identifiers_enabled: true,
            enabled_sensors: SensorType::STORED.into_iter().collect(),
            malformed_policy: MalformedPolicy::default(),
            device_profile: None,
            event_buffer_size: 256,
        }
    }
}

/// 获取默认数据目录 ~/.sensor_agent/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".sensor_agent")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        home_dir.join(".sensor_agent")
    } else {
        PathBuf::from("./sensor_agent_data")
    }
}

impl AgentConfig {
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::new()
    }

    /// 从 JSON 配置文件加载
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SensorAgentError::Config(format!("读取配置文件失败 {}: {}", path.as_ref().display(), e))
        })?;
        let config: AgentConfig = serde_json::from_str(&raw)
            .map_err(|e| SensorAgentError::Config(format!("解析配置文件失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn fixed_window(&self) -> Duration {
        Duration::from_secs(self.fixed_window_secs)
    }

    /// 窗口跨度（毫秒），与缓冲时间戳同单位
    pub fn fixed_window_millis(&self) -> i64 {
        i64::try_from(self.fixed_window().as_millis()).unwrap_or(i64::MAX)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn is_sensor_enabled(&self, sensor_type: SensorType) -> bool {
        self.enabled_sensors.contains(&sensor_type)
    }

    /// 校验配置；`require_upload_url` 为 false 时允许注入自定义 RemoteSink
    pub fn validate_with(&self, require_upload_url: bool) -> Result<()> {
        if self.sync_interval_secs == 0 {
            return Err(SensorAgentError::Config("sync_interval_secs 必须大于 0".to_string()));
        }
        if self.fixed_window_secs == 0 {
            return Err(SensorAgentError::Config("fixed_window_secs 必须大于 0".to_string()));
        }
        if self.upload_timeout_secs == 0 {
            return Err(SensorAgentError::Config("upload_timeout_secs 必须大于 0".to_string()));
        }
        if require_upload_url && self.upload_url.trim().is_empty() {
            return Err(SensorAgentError::Config("upload_url 不能为空".to_string()));
        }
        if self.enabled_sensors.contains(&SensorType::Identifiers) {
            return Err(SensorAgentError::Config(
                "identifiers 不是可采集的传感器类型".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_with(true)
    }
}

/// 配置构建器
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AgentConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_interval_secs = interval.as_secs();
        self
    }

    pub fn fixed_window(mut self, window: Duration) -> Self {
        self.config.fixed_window_secs = window.as_secs();
        self
    }

    pub fn upload_timeout(mut self, timeout: Duration) -> Self {
        self.config.upload_timeout_secs = timeout.as_secs();
        self
    }

    pub fn upload_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.upload_url = url.into();
        self
    }

    pub fn auth_token<S: Into<String>>(mut self, token: S) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn identifiers_enabled(mut self, enabled: bool) -> Self {
        self.config.identifiers_enabled = enabled;
        self
    }

    /// 设置允许采集的类型列表（覆盖默认的全部类型）
    pub fn enabled_sensors<I>(mut self, sensors: I) -> Self
    where
        I: IntoIterator<Item = SensorType>,
    {
        self.config.enabled_sensors = sensors.into_iter().filter(|s| s.is_stored()).collect();
        self
    }

    pub fn disable_sensor(mut self, sensor_type: SensorType) -> Self {
        self.config.enabled_sensors.remove(&sensor_type);
        self
    }

    pub fn malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.config.malformed_policy = policy;
        self
    }

    pub fn device_profile(mut self, identifiers: DeviceIdentifiers) -> Self {
        self.config.device_profile = Some(identifiers);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn build(self) -> AgentConfig {
        self.config
    }
}

impl Default for AgentConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
