//! Intent classification: route a task description to a [`Domain`].
//!
//! The backend is asked first, bounded by the classifier timeout. Any failure
//! (timeout, transport error, non-success status, unusable reply) falls back
//! to keyword scoring, so `classify` never fails.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::classifier::classify_by_keywords;
use crate::core::response::parse_json_object;
use crate::core::stats::ClassifierStats;
use crate::core::types::{ClassificationResult, Domain};
use crate::io::config::ClassifierConfig;
use crate::io::llm::{ChatRequest, LlmClient, LlmError};
use crate::io::prompt::{CLASSIFY_SYSTEM, prompts};

pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    config: ClassifierConfig,
    stats: Arc<ClassifierStats>,
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    domain: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

impl IntentClassifier {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        config: ClassifierConfig,
        stats: Arc<ClassifierStats>,
    ) -> Self {
        Self { llm, config, stats }
    }

    #[instrument(skip_all)]
    pub async fn classify(&self, description: &str) -> ClassificationResult {
        let result = match self.ask_backend(description).await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "classifier backend failed, using keyword fallback");
                self.fallback(description)
            }
        };
        if result.low_confidence {
            warn!(
                domain = %result.domain,
                confidence = result.confidence,
                "low-confidence classification"
            );
        }
        debug!(domain = %result.domain, fallback = result.used_fallback, "task classified");
        self.stats
            .record(result.domain, result.used_fallback, result.low_confidence);
        result
    }

    async fn ask_backend(&self, description: &str) -> Result<ClassificationResult> {
        let prompt = prompts()
            .render_classify(description)
            .context("render classification prompt")?;
        let request = ChatRequest::new(CLASSIFY_SYSTEM, prompt);
        let reply = tokio::time::timeout(self.config.timeout(), self.llm.complete(request))
            .await
            .unwrap_or(Err(LlmError::Timeout))
            .context("classification request")?;
        parse_classification(&reply, self.config.low_confidence_threshold)
    }

    fn fallback(&self, description: &str) -> ClassificationResult {
        let (domain, scores) = classify_by_keywords(description);
        ClassificationResult {
            domain,
            confidence: self.config.fallback_confidence,
            reasoning: format!(
                "keyword fallback: {} of {} keyword hits",
                scores.get(domain),
                scores.total()
            ),
            used_fallback: true,
            low_confidence: false,
        }
    }
}

/// Parse a backend reply. Unknown domains and out-of-range confidences are
/// rejected rather than coerced.
pub fn parse_classification(
    raw: &str,
    low_confidence_threshold: f64,
) -> Result<ClassificationResult> {
    let value = parse_json_object(raw)?;
    let parsed: RawClassification =
        serde_json::from_value(value).context("deserialize classification")?;
    let domain: Domain = parsed.domain.parse()?;
    if !(0.0..=1.0).contains(&parsed.confidence) {
        bail!("confidence {} is outside [0, 1]", parsed.confidence);
    }
    Ok(ClassificationResult {
        domain,
        confidence: parsed.confidence,
        reasoning: parsed.reasoning.trim().to_string(),
        used_fallback: false,
        low_confidence: parsed.confidence < low_confidence_threshold,
    })
}
