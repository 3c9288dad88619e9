use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AnalysisConfig;

/// What the analyzer is told about the user so its verdict fits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileHint {
    pub veg_type: String,
    pub goal: String,
}

impl Default for ProfileHint {
    fn default() -> Self {
        Self {
            veg_type: "Vegetarian".into(),
            goal: "General Health".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis quota exceeded; try again shortly")]
    RateLimited,
    #[error("analysis request failed: {0}")]
    Transport(String),
    #[error("analysis service answered {status}")]
    Upstream { status: u16 },
    #[error("no JSON object in analysis reply")]
    NoJson,
}

/// Turns a photo of a nutrition label into a food record
/// (`productName`, `calories`, `sugar.labelSugar`, ...).
#[async_trait]
pub trait AnalysisPipeline: Send + Sync {
    async fn analyze(
        &self,
        image: Bytes,
        content_type: &str,
        hint: &ProfileHint,
    ) -> Result<Value, AnalysisError>;
}

/// Multimodal `generateContent` endpoint with the API key as a query param.
pub struct HttpAnalysisPipeline {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpAnalysisPipeline {
    pub fn new(cfg: &AnalysisConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: cfg.url.clone(),
            api_key: cfg.api_key.clone(),
        }
    }
}

#[async_trait]
impl AnalysisPipeline for HttpAnalysisPipeline {
    async fn analyze(
        &self,
        image: Bytes,
        content_type: &str,
        hint: &ProfileHint,
    ) -> Result<Value, AnalysisError> {
        let body = request_body(&image, content_type, hint);
        let response = self
            .client
            .post(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("analysis rate limited");
            return Err(AnalysisError::RateLimited);
        }
        if !status.is_success() {
            warn!(%status, "analysis request rejected");
            return Err(AnalysisError::Upstream {
                status: status.as_u16(),
            });
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;
        let text = reply
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        debug!(chars = text.len(), "analysis reply received");
        parse_reply(text)
    }
}

fn request_body(image: &[u8], content_type: &str, hint: &ProfileHint) -> Value {
    json!({
        "contents": [{
            "parts": [
                { "text": prompt(hint) },
                {
                    "inline_data": {
                        "mime_type": content_type,
                        "data": Base64::encode_string(image),
                    }
                }
            ]
        }]
    })
}

fn prompt(hint: &ProfileHint) -> String {
    format!(
        r#"Read this product's nutrition label and ingredient list and reply with ONLY a JSON object.

Look for sugar per serving, hidden sugars, preservatives, additives, and whether the product is vegetarian.

User profile:
- Vegetarian type: {veg}
- Health goal: {goal}

Write "healthInsight" for that goal.

Schema:
{{
  "productName": "short product name",
  "vegetarianStatus": "Vegetarian / Non-Vegetarian / Vegan / Unclear",
  "healthScore": "number 0-100 for how well the product fits this user",
  "healthInsight": "one sentence verdict, at most 25 words",
  "servingDescription": "serving size and unit, e.g. 30 g (1 pack)",
  "calories": "number, kcal per serving",
  "protein": "number, g per serving",
  "carbohydrates": "number, g per serving",
  "totalFat": "number, g per serving",
  "sugar": {{
    "labelSugar": "number, g per serving as printed, 0 if missing",
    "estimatedTotalSugar": "range like '8-10' including hidden sugars",
    "hiddenSugars": ["ingredient names that are sugars"],
    "sugarComment": "one short sentence"
  }},
  "preservatives": [{{ "name": "e.g. Sodium benzoate", "concern": "one short sentence" }}],
  "additives": [{{ "name": "e.g. MSG", "concern": "one short sentence" }}]
}}

Prefer per-serving values. Unknown numbers are "0", unknown strings "Unknown"."#,
        veg = hint.veg_type,
        goal = hint.goal,
    )
}

/// Parses the span from the first `{` to the last `}` of a model reply.
pub fn parse_reply(text: &str) -> Result<Value, AnalysisError> {
    let start = text.find('{').ok_or(AnalysisError::NoJson)?;
    let end = text.rfind('}').ok_or(AnalysisError::NoJson)?;
    if end < start {
        return Err(AnalysisError::NoJson);
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(_) => Err(AnalysisError::NoJson),
        Err(e) => {
            debug!(error = %e, "analysis reply is not valid JSON");
            Err(AnalysisError::NoJson)
        }
    }
}
