//! info_search_web：Google Custom Search JSON API
//!
//! GET 请求带超时；非 2xx 响应转为 Transport 错误（携带状态码与响应体）；
//! 结果为格式化后的 JSON，超过 max_result_chars 时截断并追加 ...[truncated]。

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::ToolError;
use crate::tools::{ToolContext, TypedTool};

/// 默认 API 地址
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

/// 时间过滤
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DateRange {
    #[default]
    All,
    PastHour,
    PastDay,
    PastWeek,
    PastMonth,
    PastYear,
}

impl DateRange {
    /// 对应 API 的 dateRestrict 参数
    pub fn date_restrict(self) -> Option<&'static str> {
        match self {
            DateRange::All => None,
            DateRange::PastHour => Some("h1"),
            DateRange::PastDay => Some("d1"),
            DateRange::PastWeek => Some("w1"),
            DateRange::PastMonth => Some("m1"),
            DateRange::PastYear => Some("y1"),
        }
    }
}

fn default_num() -> u32 {
    5
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchArgs {
    /// Google 风格查询，3-5 个关键词
    pub query: String,
    #[serde(default)]
    pub date_range: DateRange,
    /// 返回条数
    #[serde(default = "default_num")]
    pub num: u32,
}

/// Search 工具
pub struct SearchTool {
    client: Client,
    endpoint: String,
    api_key: String,
    cx: String,
    max_result_chars: usize,
}

impl SearchTool {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        cx: impl Into<String>,
        timeout_secs: u64,
        max_result_chars: usize,
    ) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            cx: cx.into(),
            max_result_chars,
        }
    }

    /// 组装查询参数
    fn query_params(&self, args: &SearchArgs) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", args.query.clone()),
            ("num", args.num.to_string()),
            ("key", self.api_key.clone()),
            ("cx", self.cx.clone()),
        ];
        if let Some(restrict) = args.date_range.date_restrict() {
            params.push(("dateRestrict", restrict.to_string()));
        }
        params
    }

    fn truncate(&self, body: String) -> String {
        if body.chars().count() > self.max_result_chars {
            body.chars().take(self.max_result_chars).collect::<String>() + "\n...[truncated]"
        } else {
            body
        }
    }
}

#[async_trait]
impl TypedTool for SearchTool {
    type Args = SearchArgs;
    const NAME: &'static str = "info_search_web";

    fn description(&self) -> &str {
        "Search web pages with Google Custom Search. Args: query (3-5 keywords), optional date_range \
         (all, past_hour, past_day, past_week, past_month, past_year) and num (default 5)."
    }

    fn describe(&self, args: &SearchArgs) -> String {
        format!("Searching web for: {}", args.query)
    }

    async fn call(&self, _ctx: &ToolContext, args: SearchArgs) -> Result<String, ToolError> {
        tracing::info!(query = %args.query, date_range = ?args.date_range, "search tool execute");
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&self.query_params(&args))
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("Request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ToolError::Execution(format!("Read body: {e}")))?;
        if !status.is_success() {
            return Err(ToolError::Transport {
                status: status.as_u16(),
                body,
            });
        }

        let pretty = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| serde_json::to_string_pretty(&v).ok())
            .unwrap_or(body);
        Ok(self.truncate(pretty))
    }
}
