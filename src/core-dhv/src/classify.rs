//! Per-PDF document-type classification.
//!
//! The model is treated as a best-effort oracle: a low-confidence answer, a
//! malformed response, a quota refusal, or a timeout all fall back to a
//! filename rule table that independently produces a valid label. The
//! system's correctness envelope never depends on the model being up.

use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use data_model_dhv::models::DocumentType;

use crate::llms::{LlmProvider, prompt_classify_pdf};

/// Hard timeout on the model call; hitting it triggers the filename fallback.
pub const LLM_TIMEOUT: Duration = Duration::from_secs(30);

/// Model answers below this confidence are discarded.
pub const MIN_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct Classification {
    pub document_type: DocumentType,
    pub is_technical: bool,
    pub reason: String,
}

impl Classification {
    fn of(document_type: DocumentType, reason: String) -> Self {
        Self {
            document_type,
            is_technical: document_type.is_technical(),
            reason,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LlmVerdict {
    document_type: String,
    confidence: f32,
}

/// Classifies one PDF from its filename and (when extraction succeeded) the
/// text of its first page.
pub async fn classify_pdf<P: LlmProvider + ?Sized>(
    provider: Option<&P>,
    filename: &str,
    first_page_text: Option<&str>,
) -> Classification {
    if let Some(provider) = provider {
        let prompt = match prompt_classify_pdf(filename, first_page_text.unwrap_or("")) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Failed to build classification prompt for '{}': {}", filename, e);
                return classify_by_filename(filename);
            }
        };

        match tokio::time::timeout(LLM_TIMEOUT, provider.complete_prompt(&prompt)).await {
            Ok(Ok(response)) => match parse_verdict(&response) {
                Some(verdict) if verdict.confidence >= MIN_CONFIDENCE => {
                    let document_type = DocumentType::parse(&verdict.document_type);
                    return Classification::of(
                        document_type,
                        format!(
                            "Model classified as '{}' (confidence {:.2})",
                            document_type, verdict.confidence
                        ),
                    );
                }
                Some(verdict) => {
                    tracing::info!(
                        "Model confidence {:.2} below threshold for '{}', using filename fallback",
                        verdict.confidence,
                        filename
                    );
                }
                None => {
                    tracing::warn!(
                        "Model returned no parsable JSON verdict for '{}', using filename fallback",
                        filename
                    );
                }
            },
            Ok(Err(e)) => {
                tracing::warn!("Model call failed for '{}': {}; using filename fallback", filename, e);
            }
            Err(_) => {
                tracing::warn!("Model call timed out for '{}', using filename fallback", filename);
            }
        }
    }

    classify_by_filename(filename)
}

/// Pulls a JSON object out of the raw model response. Models wrap answers in
/// prose or code fences often enough that a strict parse is not worth it.
fn parse_verdict(response: &str) -> Option<LlmVerdict> {
    let envelope = Regex::new(r"(?s)\{.*\}").expect("static regex");
    let json_str = envelope.find(response)?.as_str();
    match serde_json::from_str::<LlmVerdict>(json_str) {
        Ok(v) => Some(v),
        Err(_) => {
            // strip code fences and retry once
            let cleaned = json_str.replace("```json", "").replace("```", "");
            serde_json::from_str::<LlmVerdict>(cleaned.trim()).ok()
        }
    }
}

/// Filename rule table, first match wins. Matching runs over a normalized
/// form (lowercase, hyphens/underscores/spaces removed) so `Data-Sheet`,
/// `data sheet` and `datasheet` all hit the same rule.
const FILENAME_RULES: &[(&str, DocumentType)] = &[
    ("submittal", DocumentType::SubmittalSheet),
    ("datasheet", DocumentType::TechnicalDataSheet),
    ("iom", DocumentType::OperationMaintenance),
    ("install", DocumentType::InstallationManual),
    ("spec", DocumentType::SpecificationSheet),
    ("catalog", DocumentType::Marketing),
    ("brochure", DocumentType::Marketing),
];

pub fn classify_by_filename(filename: &str) -> Classification {
    let normalized = normalize_for_matching(filename);

    for (keyword, document_type) in FILENAME_RULES {
        if normalized.contains(keyword) {
            return Classification::of(
                *document_type,
                format!("Filename heuristic matched '{}'", keyword),
            );
        }
    }

    Classification::of(
        DocumentType::Unknown,
        "No filename rule matched".to_string(),
    )
}

fn normalize_for_matching(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llms::MockLlm;

    #[test]
    fn test_filename_rules() {
        let cases = [
            ("AB-100_Submittal.pdf", DocumentType::SubmittalSheet, true),
            ("ab100-data-sheet.pdf", DocumentType::TechnicalDataSheet, true),
            ("AB100 Data Sheet.pdf", DocumentType::TechnicalDataSheet, true),
            ("ab100_iom.pdf", DocumentType::OperationMaintenance, false),
            ("installation-guide.pdf", DocumentType::InstallationManual, false),
            ("ab100-spec.pdf", DocumentType::SpecificationSheet, true),
            ("2026-catalog.pdf", DocumentType::Marketing, false),
            ("product-brochure.pdf", DocumentType::Marketing, false),
            ("xyzzy.pdf", DocumentType::Unknown, false),
        ];
        for (filename, expected_type, expected_technical) in cases {
            let c = classify_by_filename(filename);
            assert_eq!(c.document_type, expected_type, "filename: {}", filename);
            assert_eq!(c.is_technical, expected_technical, "filename: {}", filename);
        }
    }

    #[test]
    fn test_submittal_beats_spec() {
        // Both keywords present: the more specific rule wins by order
        let c = classify_by_filename("submittal-spec-ab100.pdf");
        assert_eq!(c.document_type, DocumentType::SubmittalSheet);
    }

    #[test]
    fn test_parse_verdict_plain_json() {
        let v = parse_verdict(r#"{"document_type": "Submittal Sheet", "confidence": 0.92}"#).unwrap();
        assert_eq!(v.document_type, "Submittal Sheet");
        assert!((v.confidence - 0.92).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_verdict_with_surrounding_noise() {
        let response = "Sure! Here is the classification you asked for:\n\
            {\"document_type\": \"Product Data Sheet\", \"confidence\": 0.8}\n\
            Let me know if you need anything else.";
        let v = parse_verdict(response).unwrap();
        assert_eq!(v.document_type, "Product Data Sheet");
    }

    #[test]
    fn test_parse_verdict_garbage() {
        assert!(parse_verdict("I cannot classify this document.").is_none());
        assert!(parse_verdict("{not json at all").is_none());
    }

    #[tokio::test]
    async fn test_classify_uses_model_verdict() {
        let llm = MockLlm::returning(r#"{"document_type": "Specification Sheet", "confidence": 0.9}"#);
        let c = classify_pdf(Some(&llm), "mystery.pdf", Some("3-part specification")).await;
        assert_eq!(c.document_type, DocumentType::SpecificationSheet);
        assert!(c.is_technical);
    }

    #[tokio::test]
    async fn test_classify_low_confidence_falls_back() {
        let llm = MockLlm::returning(r#"{"document_type": "Marketing", "confidence": 0.3}"#);
        let c = classify_pdf(Some(&llm), "ab100-datasheet.pdf", None).await;
        // heuristic wins: low-confidence Marketing is ignored
        assert_eq!(c.document_type, DocumentType::TechnicalDataSheet);
    }

    #[tokio::test]
    async fn test_classify_model_failure_falls_back() {
        let llm = MockLlm::failing();
        let c = classify_pdf(Some(&llm), "valve-submittal.pdf", None).await;
        assert_eq!(c.document_type, DocumentType::SubmittalSheet);
        assert!(c.is_technical);
    }

    #[tokio::test]
    async fn test_classify_invalid_json_falls_back() {
        let llm = MockLlm::returning("The document appears to be technical in nature.");
        let c = classify_pdf(Some(&llm), "pump-install.pdf", None).await;
        assert_eq!(c.document_type, DocumentType::InstallationManual);
        assert!(!c.is_technical);
    }

    #[tokio::test]
    async fn test_classify_without_provider() {
        let c = classify_pdf(None::<&MockLlm>, "ab-catalog.pdf", None).await;
        assert_eq!(c.document_type, DocumentType::Marketing);
    }

    #[tokio::test]
    async fn test_model_unknown_label_maps_to_unknown() {
        let llm = MockLlm::returning(r#"{"document_type": "Recipe Book", "confidence": 0.95}"#);
        let c = classify_pdf(Some(&llm), "mystery.pdf", None).await;
        assert_eq!(c.document_type, DocumentType::Unknown);
        assert!(!c.is_technical);
    }
}
