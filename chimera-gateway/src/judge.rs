// chimera-gateway/src/judge.rs
// ============================================================================
// Module: Probabilistic Judge Client
// Description: External risk classifier over an HTTP chat-completions API.
// Purpose: Fold an LLM judgement into the pipeline without blocking it.
// Dependencies: chimera-core, reqwest, serde, serde_json
// ============================================================================

//! ## Overview
//! The judge formats one prompt per call — tool name, serialized arguments,
//! and a short context summary — and expects a structured verdict back.
//! Every failure mode is fail-open: transport errors, over-budget requests,
//! and malformed replies all degrade to the zeroed "unavailable" assessment
//! so the deterministic policy phases still run. The request timeout is the
//! classification budget.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use chimera_core::context::CallContext;
use chimera_core::risk::RiskAssessment;
use chimera_core::risk::RiskClassifier;
use serde::Deserialize;
use serde_json::json;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable carrying the judge API key.
pub const JUDGE_API_KEY_ENV: &str = "CHIMERA_JUDGE_API_KEY";

/// Default system prompt when the scenario does not override it.
const DEFAULT_PROMPT: &str = "You are a vigilant security judge for tool calls. Respond with a \
                              single JSON object: {\"risk\": 0.0-1.0, \"confidence\": 0.0-1.0, \
                              \"reason\": string, \"tags\": [string]}.";

// ============================================================================
// SECTION: Client
// ============================================================================

/// HTTP client for an external probabilistic judge.
pub struct HttpJudgeClassifier {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    prompt: String,
    api_key: Option<String>,
}

impl HttpJudgeClassifier {
    /// Builds a judge client; the budget becomes the request timeout.
    ///
    /// # Errors
    ///
    /// Returns a string error when the HTTP client cannot be constructed.
    pub fn new(
        endpoint: impl Into<String>,
        model: Option<String>,
        prompt: Option<String>,
        budget_ms: u64,
    ) -> Result<Self, String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(budget_ms))
            .build()
            .map_err(|err| format!("judge client build failed: {err}"))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            prompt: prompt.unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
            api_key: std::env::var(JUDGE_API_KEY_ENV).ok(),
        })
    }

    /// Formats the per-call user prompt.
    fn user_prompt(tool: &str, args: &Value, context: &CallContext) -> String {
        let summary = json!({
            "user_role": context.user_role,
            "source": context.source,
            "ticket": context.ticket,
            "is_tainted": context.is_tainted,
            "accumulated_risk": context.accumulated_risk,
        });
        format!(
            "Analyze this tool call.\nTool: {tool}\nArguments: {args}\nContext: {summary}"
        )
    }

    /// Sends the request and extracts the structured verdict.
    fn request_verdict(&self, user_prompt: &str) -> Option<RiskAssessment> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": self.prompt},
                {"role": "user", "content": user_prompt},
            ],
        });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        let response: ChatResponse = request.send().ok()?.error_for_status().ok()?.json().ok()?;
        let content = response.choices.first()?.message.content.as_str();
        let verdict: JudgeVerdict = serde_json::from_str(content.trim()).ok()?;
        Some(
            RiskAssessment::new(
                verdict.risk,
                verdict.confidence,
                verdict.reason,
                verdict.tags,
            ),
        )
    }
}

impl RiskClassifier for HttpJudgeClassifier {
    fn classify(&self, tool: &str, args: &Value, context: &CallContext) -> RiskAssessment {
        let prompt = Self::user_prompt(tool, args, context);
        self.request_verdict(&prompt).unwrap_or_else(RiskAssessment::unavailable)
    }
}

// ============================================================================
// SECTION: Wire Shapes
// ============================================================================

/// Chat-completions response envelope.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    /// Completion choices; the first is used.
    choices: Vec<ChatChoice>,
}

/// One completion choice.
#[derive(Debug, Deserialize)]
struct ChatChoice {
    /// Assistant message.
    message: ChatMessage,
}

/// Assistant message body.
#[derive(Debug, Deserialize)]
struct ChatMessage {
    /// Message text, expected to be one JSON object.
    content: String,
}

/// Structured verdict parsed from the judge reply.
#[derive(Debug, Deserialize)]
struct JudgeVerdict {
    /// Risk score.
    #[serde(alias = "risk_score")]
    risk: f64,
    /// Confidence in the score.
    #[serde(default = "default_confidence")]
    confidence: f64,
    /// Reasoning.
    #[serde(default)]
    reason: String,
    /// Violation tags.
    #[serde(default, alias = "violation_tags")]
    tags: Vec<String>,
}

const fn default_confidence() -> f64 {
    1.0
}

// ============================================================================
// SECTION: Tests
// ============================================================================
