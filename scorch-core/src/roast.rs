//! Roast text generation.
//!
//! Two request shapes against the text backend: a single-shot text roast,
//! and a two-step image roast (describe the selfie, then roast the
//! description). Responses are nominally JSON with `roast`, `finalBurn`
//! and `ratings` fields, but the backend sometimes returns the JSON as an
//! encoded string, or plain prose — parsing degrades instead of failing.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{Result, ScorchError};

/// Model identifier for text generation requests.
pub const DEFAULT_TEXT_MODEL: &str = "mistralai-large";

/// Default roast master persona.
pub const DEFAULT_PERSONA: &str = "Savage Comedian";

const FALLBACK_ROAST: &str = "This one is beyond my roasting abilities!";
const FALLBACK_BURN: &str = "If selfies were a crime, yours would be a life sentence.";

/// How hard the roast hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoastIntensity {
    Light,
    #[default]
    Medium,
    Dark,
}

impl RoastIntensity {
    pub fn id(self) -> &'static str {
        match self {
            RoastIntensity::Light => "light",
            RoastIntensity::Medium => "medium",
            RoastIntensity::Dark => "dark",
        }
    }

    /// Tone instruction injected into the system prompt.
    pub fn instruction(self) -> &'static str {
        match self {
            RoastIntensity::Light => {
                "Be playful and funny while roasting. Keep it light and humorous with witty observations."
            }
            RoastIntensity::Medium => {
                "Be sassy and clever while roasting. Include some sharper jokes but maintain a fun tone."
            }
            RoastIntensity::Dark => {
                "Be absolutely savage but hilarious. Don't hold back, but still make it humorous rather than mean."
            }
        }
    }
}

impl std::str::FromStr for RoastIntensity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(RoastIntensity::Light),
            "medium" => Ok(RoastIntensity::Medium),
            "dark" => Ok(RoastIntensity::Dark),
            _ => Err(format!("unknown intensity '{s}'")),
        }
    }
}

/// A generated roast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoastResponse {
    pub roast: String,
    pub final_burn: String,
    /// Category → score in percent (the backend is asked for 5–30).
    #[serde(default = "default_ratings")]
    pub ratings: BTreeMap<String, u8>,
}

fn default_ratings() -> BTreeMap<String, u8> {
    BTreeMap::from([
        ("Creativity".to_string(), 20),
        ("Confidence".to_string(), 15),
        ("Style".to_string(), 10),
        ("Mystery".to_string(), 5),
        ("Self-Awareness".to_string(), 30),
    ])
}

/// Client for the text-generation backend.
pub struct RoastClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    access_code: Option<String>,
}

impl RoastClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            model: DEFAULT_TEXT_MODEL.to_string(),
            access_code: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_access_code(mut self, code: Option<String>) -> Self {
        self.access_code = code;
        self
    }

    /// Generate a roast from user-supplied text.
    pub async fn generate_text_roast(
        &self,
        text: &str,
        intensity: RoastIntensity,
        persona: &str,
    ) -> Result<RoastResponse> {
        let messages = json!([
            { "role": "system", "content": roast_system_prompt(persona, intensity) },
            { "role": "user", "content": format!("Roast me based on this text: {text}") },
        ]);
        let raw = self.request(messages, true).await?;
        Ok(parse_roast_payload(&raw))
    }

    /// Generate a roast from a base64-encoded selfie.
    ///
    /// Two steps: ask the vision model to describe the image, then roast
    /// the description.
    pub async fn generate_image_roast(
        &self,
        base64_image: &str,
        intensity: RoastIntensity,
        persona: &str,
    ) -> Result<RoastResponse> {
        let analysis_messages = json!([
            {
                "role": "user",
                "content": [
                    {
                        "type": "text",
                        "text": "Analyze this selfie for a humorous roast. Focus on visible features, style, background, and expression."
                    },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/jpeg;base64,{base64_image}") }
                    }
                ]
            }
        ]);
        let analysis = self.request(analysis_messages, false).await?;
        debug!(analysis_chars = analysis.len(), "selfie analysis complete");

        let roast_messages = json!([
            { "role": "system", "content": roast_system_prompt(persona, intensity) },
            {
                "role": "user",
                "content": format!("Based on this selfie analysis, create a hilarious roast: {analysis}")
            },
        ]);
        let raw = self.request(roast_messages, true).await?;
        Ok(parse_roast_payload(&raw))
    }

    async fn request(&self, messages: Value, json_mode: bool) -> Result<String> {
        let seed: u32 = rand::thread_rng().gen_range(0..1_000_000);
        let mut body = json!({
            "messages": messages,
            "model": self.model,
            "jsonMode": json_mode,
            "seed": seed,
        });
        if let Some(code) = &self.access_code {
            body["code"] = json!(code);
        }

        info!(model = %self.model, json_mode, "roast generation request");

        let response = self.http.post(&self.base_url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ScorchError::Transport {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.text().await?)
    }
}

fn roast_system_prompt(persona: &str, intensity: RoastIntensity) -> String {
    format!(
        "You are {persona}, a hilarious AI roast master. {} \
         Create a humorous, exaggerated roast with witty observations. \
         Include a funny one-liner at the end as a \"FINAL BURN\". \
         Also generate ratings on a scale of 5-30% for the following categories: \
         Creativity, Confidence, Style, Mystery, and Self-Awareness. \
         Format your response as JSON with 'roast', 'finalBurn', and 'ratings' fields.",
        intensity.instruction()
    )
}

/// Coerce whatever the backend returned into a `RoastResponse`.
///
/// Accepted shapes, probed in order: a JSON object with the expected
/// fields; a JSON string that itself encodes that object; anything else,
/// which becomes the roast text with default burn and ratings.
pub fn parse_roast_payload(raw: &str) -> RoastResponse {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return prose_fallback(raw),
    };

    let object = match value {
        Value::String(inner) => match serde_json::from_str::<Value>(&inner) {
            Ok(v) => v,
            Err(_) => return prose_fallback(&inner),
        },
        other => other,
    };

    match serde_json::from_value::<RoastResponse>(object.clone()) {
        Ok(mut parsed) => {
            if parsed.roast.is_empty() {
                parsed.roast = FALLBACK_ROAST.to_string();
            }
            if parsed.final_burn.is_empty() {
                parsed.final_burn = FALLBACK_BURN.to_string();
            }
            parsed
        }
        Err(e) => {
            warn!(error = %e, "roast response missing expected fields");
            // Salvage a roast field if one exists.
            let roast = object
                .get("roast")
                .and_then(Value::as_str)
                .unwrap_or(FALLBACK_ROAST)
                .to_string();
            RoastResponse {
                roast,
                final_burn: FALLBACK_BURN.to_string(),
                ratings: default_ratings(),
            }
        }
    }
}

fn prose_fallback(text: &str) -> RoastResponse {
    let trimmed = text.trim();
    RoastResponse {
        roast: if trimmed.is_empty() {
            FALLBACK_ROAST.to_string()
        } else {
            trimmed.to_string()
        },
        final_burn: FALLBACK_BURN.to_string(),
        ratings: default_ratings(),
    }
}
