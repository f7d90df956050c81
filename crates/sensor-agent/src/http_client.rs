//! HTTP 上报模块 - RemoteSink 的 reqwest 实现
//!
//! 一批载荷以 JSON 数组 POST 到采集端，2xx 视为确认；
//! 其余状态码、网络错误、超时都归为 `UploadFailure`。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error, info};

use crate::config::HttpClientConfig;
use crate::error::{Result, SensorAgentError, UploadFailure};
use crate::sync::encoder::EncodedPayload;

/// 远端采集端
#[async_trait]
pub trait RemoteSink: Send + Sync {
    /// 上报一批载荷；返回 Ok 表示服务端已确认
    async fn upload(&self, batch: &[EncodedPayload]) -> std::result::Result<(), UploadFailure>;
}

/// HTTP 采集端
pub struct HttpRemoteSink {
    client: Client,
    upload_url: String,
    auth_token: Option<String>,
    /// 超时错误上报的时长，取请求超时，未配置时取连接超时
    timeout: Duration,
}

impl HttpRemoteSink {
    pub fn new(config: &HttpClientConfig, upload_url: String, auth_token: Option<String>) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let timeout = config
            .request_timeout_secs
            .or(config.connect_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or_default();

        let client = builder
            .build()
            .map_err(|e| SensorAgentError::Transport(format!("创建 HTTP 客户端失败: {}", e)))?;

        info!("✅ HTTP 上报客户端已创建 (upload_url: {})", upload_url);

        Ok(Self {
            client,
            upload_url,
            auth_token,
            timeout,
        })
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }
}

#[async_trait]
impl RemoteSink for HttpRemoteSink {
    async fn upload(&self, batch: &[EncodedPayload]) -> std::result::Result<(), UploadFailure> {
        let body = serde_json::to_vec(batch)
            .map_err(|e| UploadFailure::Serialization(e.to_string()))?;

        debug!("📤 上报 {} 条载荷 ({} bytes)", batch.len(), body.len());

        let mut request = self
            .client
            .post(&self.upload_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);

        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UploadFailure::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "无法读取错误信息".to_string());
            error!("❌ 上报失败，HTTP 状态码: {}, 错误: {}", status, error_text);
            return Err(UploadFailure::Rejected {
                status: status.as_u16(),
                message: error_text,
            });
        }

        Ok(())
    }
}
