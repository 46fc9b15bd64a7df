//! extraInfo 文档拉取

use crate::error::MonitorError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// 开发模式模板中的 PvD 占位符。
pub const PVD_PLACEHOLDER: &str = "{pvd}";

/// 一次 GET 的结果（尚未校验状态码与响应体）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    /// `Expires`（或 `Expire`）响应头
    pub expires: Option<String>,
    pub body: String,
}

impl FetchResponse {
    /// 校验状态码并解析 JSON，返回 (文档, 过期响应头)。
    pub fn into_document(self) -> Result<(Value, Option<String>), MonitorError> {
        if !(200..300).contains(&self.status) {
            return Err(MonitorError::Status(self.status));
        }
        let document = serde_json::from_str::<Value>(&self.body)
            .map_err(|error| MonitorError::Body(error.to_string()))?;
        Ok((document, self.expires))
    }
}

/// extraInfo 拉取抽象。
#[async_trait]
pub trait ExtraInfoFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, MonitorError>;
}

/// 基于 reqwest 的实现。
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, MonitorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| MonitorError::Fetch(error.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ExtraInfoFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, MonitorError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| MonitorError::Fetch(error.to_string()))?;

        let status = response.status().as_u16();
        let expires = ["expires", "expire"].iter().find_map(|name| {
            response
                .headers()
                .get(*name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        });
        let body = response
            .text()
            .await
            .map_err(|error| MonitorError::Fetch(error.to_string()))?;

        Ok(FetchResponse {
            status,
            expires,
            body,
        })
    }
}

/// 拉取地址：开发模式使用模板，否则为 `https://<pvd>/pvd.json`。
pub fn extra_info_url(development: bool, dev_url_template: &str, pvd_id: &str) -> String {
    if development {
        dev_url_template.replace(PVD_PLACEHOLDER, pvd_id)
    } else {
        format!("https://{}/pvd.json", pvd_id)
    }
}
