use serde::{Deserialize, Serialize};

use crate::error::{PennyError, Result};

/// A taxonomy entry offered to the classifier.
#[derive(Debug, Clone)]
pub struct CategoryOption {
    pub key: String,
    pub group: String,
}

/// A recently-confirmed transaction used as a few-shot example.
#[derive(Debug, Clone)]
pub struct ConfirmedExample {
    pub description: String,
    pub amount: f64,
    pub category_key: String,
}

#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    pub description: String,
    pub amount: f64,
    pub categories: Vec<CategoryOption>,
    pub examples: Vec<ConfirmedExample>,
}

/// Generative fallback tier of the cascade. Best effort: the caller
/// validates the returned key against the real taxonomy and treats any
/// error as "no match".
pub trait Classifier {
    fn classify(&self, request: &ClassifyRequest) -> Result<String>;
}

fn build_prompt(request: &ClassifyRequest) -> String {
    let category_list = request
        .categories
        .iter()
        .map(|c| format!("- {} ({})", c.key, c.group))
        .collect::<Vec<_>>()
        .join("\n");

    let examples_text = request
        .examples
        .iter()
        .map(|e| format!("\"{}\" ${:.2} -> {}", e.description, e.amount, e.category_key))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a personal finance categorization assistant. Given a bank \
         transaction description and amount, classify it into one of the \
         user's categories.\n\n\
         VALID CATEGORIES:\n{category_list}\n\n\
         EXAMPLES FROM THIS USER'S HISTORY:\n{examples_text}\n\n\
         TRANSACTION TO CLASSIFY:\n\
         Description: \"{}\"\nAmount: ${:.2}\n\n\
         Respond with ONLY the category key, nothing else. If unsure, respond \
         with your best guess.",
        request.description, request.amount
    )
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: i32,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Deserialize)]
struct ApiContent {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ApiContent>,
}

/// Anthropic messages-API implementation of the fallback tier.
pub struct AnthropicClassifier {
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl AnthropicClassifier {
    pub fn new(api_key: &str, model: &str) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        }
    }
}

impl Classifier for AnthropicClassifier {
    fn classify(&self, request: &ClassifyRequest) -> Result<String> {
        let body = ApiRequest {
            model: &self.model,
            max_tokens: 50,
            messages: vec![ApiMessage {
                role: "user",
                content: build_prompt(request),
            }],
        };

        let resp = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()?;

        if !resp.status().is_success() {
            return Err(PennyError::Other(format!(
                "classifier API returned {}",
                resp.status()
            )));
        }

        let parsed: ApiResponse = resp.json()?;
        let text = parsed
            .content
            .first()
            .map(|c| c.text.trim().to_lowercase())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(PennyError::Other("empty classifier response".to_string()));
        }
        Ok(text)
    }
}
