//! Client for the upstream Trade Tariff JSON API.

use crate::utils::error::{HelpdeskError, Result};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

static DUTY_HTML_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<span.*>\s?(?P<duty>\d[\d\.]*?)\s?</span>").unwrap());

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TariffApiConfig {
    /// Paths like `sections` are joined onto it, with or without a trailing `/`.
    pub base_url: String,
    pub timeout_seconds: Option<u64>,
    pub headers: Option<HashMap<String, String>>,
    pub parameters: Option<HashMap<String, String>>,
    pub auth: Option<BasicAuth>,
}

impl TariffApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_seconds: None,
            headers: None,
            parameters: None,
            auth: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommodityType {
    Section,
    Chapter,
    Heading,
    Commodity,
}

impl CommodityType {
    fn path(&self) -> &'static str {
        match self {
            CommodityType::Section => "sections",
            CommodityType::Chapter => "chapters",
            CommodityType::Heading => "headings",
            CommodityType::Commodity => "commodities",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradeTariffClient {
    client: Client,
    config: TariffApiConfig,
}

impl TradeTariffClient {
    pub fn new(config: TariffApiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        if self.config.base_url.ends_with('/') {
            format!("{}{}", self.config.base_url, path)
        } else {
            format!("{}/{}", self.config.base_url, path)
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        let mut request = self.client.get(&url);

        if let Some(headers) = &self.config.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        if let Some(params) = &self.config.parameters {
            for (key, value) in params {
                request = request.query(&[(key, value)]);
            }
        }

        if let Some(auth) = &self.config.auth {
            request = request.basic_auth(&auth.username, auth.password.as_ref());
        }

        let timeout = self.config.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        request = request.timeout(Duration::from_secs(timeout));

        tracing::debug!("Requesting {}", url);
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            tracing::warn!("📡 {} answered with {}", url, status);
            return Err(HelpdeskError::ApiStatusError {
                url,
                status: status.as_u16(),
            });
        }

        Ok(response.json().await?)
    }

    /// Payload of a single item. The API nests it under `data.attributes`
    /// in its v2 shape; both shapes are accepted.
    pub async fn item(&self, kind: CommodityType, id: &str) -> Result<Value> {
        let payload = self.get_json(&format!("{}/{}", kind.path(), id)).await?;
        Ok(unwrap_attributes(payload))
    }

    pub async fn sections(&self) -> Result<Vec<SectionJson>> {
        let payload = self.get_json(CommodityType::Section.path()).await?;
        let items = match payload {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("data") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        Ok(items
            .into_iter()
            .map(|item| SectionJson(item_attributes(item)))
            .collect())
    }

    pub async fn chapter(&self, code: &str) -> Result<ChapterJson> {
        Ok(ChapterJson(self.item(CommodityType::Chapter, code).await?))
    }

    pub async fn heading(&self, code: &str) -> Result<HeadingJson> {
        Ok(HeadingJson(self.item(CommodityType::Heading, code).await?))
    }

    pub async fn commodity(&self, code: &str) -> Result<CommodityJson> {
        Ok(CommodityJson(self.item(CommodityType::Commodity, code).await?))
    }
}

fn unwrap_attributes(payload: Value) -> Value {
    match payload {
        Value::Object(mut obj) if obj.contains_key("data") => match obj.remove("data") {
            Some(Value::Object(mut data)) => data
                .remove("attributes")
                .unwrap_or(Value::Object(data)),
            Some(other) => other,
            None => Value::Null,
        },
        other => other,
    }
}

/// `attributes` of a list entry in the v2 shape, the entry itself otherwise.
fn item_attributes(item: Value) -> Value {
    match item {
        Value::Object(mut obj) if obj.contains_key("attributes") => obj
            .remove("attributes")
            .unwrap_or(Value::Object(obj)),
        other => other,
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionJson(pub Value);

impl SectionJson {
    pub fn title(&self) -> Option<&str> {
        str_at(&self.0, "/title")
    }

    pub fn position(&self) -> Option<i64> {
        self.0.get("position").and_then(Value::as_i64)
    }

    pub fn numeral(&self) -> Option<&str> {
        str_at(&self.0, "/numeral")
    }

    /// Two-digit chapter ids from `chapter_from` to `chapter_to`.
    pub fn chapter_ids(&self) -> Vec<String> {
        let bound = |key: &str| -> Option<u32> {
            match self.0.get(key)? {
                Value::String(s) => s.parse().ok(),
                Value::Number(n) => n.as_u64().map(|n| n as u32),
                _ => None,
            }
        };

        match (bound("chapter_from"), bound("chapter_to")) {
            (Some(from), Some(to)) => (from..=to).map(|id| format!("{:02}", id)).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChapterJson(pub Value);

impl ChapterJson {
    pub fn title(&self) -> Option<&str> {
        str_at(&self.0, "/formatted_description")
    }

    pub fn code(&self) -> Option<&str> {
        str_at(&self.0, "/goods_nomenclature_item_id")
    }

    pub fn goods_nomenclature_sid(&self) -> Option<i64> {
        self.0.get("goods_nomenclature_sid").and_then(Value::as_i64)
    }

    pub fn headings(&self) -> &[Value] {
        self.0
            .get("headings")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn heading_ids(&self) -> Vec<String> {
        self.headings()
            .iter()
            .filter_map(|h| str_at(h, "/goods_nomenclature_item_id"))
            .map(|id| id.chars().take(4).collect())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadingJson(pub Value);

impl HeadingJson {
    pub fn title(&self) -> Option<String> {
        str_at(&self.0, "/formatted_description")
            .map(|title| title.replace("&nbsp;", " ").trim().to_string())
    }

    pub fn code(&self) -> Option<&str> {
        str_at(&self.0, "/goods_nomenclature_item_id")
    }

    pub fn commodities(&self) -> &[Value] {
        self.0
            .get("commodities")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `(code, is_leaf)` of each commodity under the heading.
    pub fn commodity_ids(&self) -> Vec<(String, bool)> {
        if self.0.get("commodities").is_none() {
            tracing::warn!(
                "No commodities found for heading {}",
                self.code().unwrap_or("?")
            );
        }
        self.commodities()
            .iter()
            .filter_map(|c| {
                let id = str_at(c, "/goods_nomenclature_item_id")?;
                let leaf = c.get("leaf").and_then(Value::as_bool).unwrap_or(false);
                Some((id.to_string(), leaf))
            })
            .collect()
    }
}

/// The single commodity of `heading` whose code is `code`.
pub fn find_commodity<'h>(heading: &'h HeadingJson, code: &str) -> Result<&'h Value> {
    let matches: Vec<&Value> = heading
        .commodities()
        .iter()
        .filter(|c| str_at(c, "/goods_nomenclature_item_id") == Some(code))
        .collect();

    match matches.as_slice() {
        [] => Err(HelpdeskError::NoResultError {
            query: code.to_string(),
        }),
        [single] => Ok(*single),
        many => Err(HelpdeskError::MultipleResultsError {
            query: code.to_string(),
            count: many.len(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommodityJson(pub Value);

impl CommodityJson {
    pub fn title(&self) -> Option<&str> {
        str_at(&self.0, "/description")
    }

    pub fn code(&self) -> Option<&str> {
        str_at(&self.0, "/goods_nomenclature_item_id")
    }

    pub fn heading_description(&self) -> Option<&str> {
        str_at(&self.0, "/heading/description")
    }

    pub fn chapter_title(&self) -> Option<&str> {
        str_at(&self.0, "/chapter/formatted_description")
    }

    pub fn chapter_note(&self) -> Option<&str> {
        str_at(&self.0, "/chapter/chapter_note")
    }

    pub fn section_position(&self) -> Option<i64> {
        self.0.pointer("/section/position").and_then(Value::as_i64)
    }

    /// Percentage out of the `basic_duty_rate` HTML fragment.
    pub fn duty_rate(&self) -> Option<f64> {
        str_at(&self.0, "/basic_duty_rate").and_then(parse_duty_rate)
    }
}

pub fn parse_duty_rate(html: &str) -> Option<f64> {
    DUTY_HTML_RE
        .captures(html)
        .and_then(|caps| caps.name("duty"))
        .and_then(|duty| duty.as_str().parse().ok())
}
