use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use crate::models::EngineType;
use crate::pipeline::ensemble::{merge, Candidate};

use super::engine::{EngineError, EngineOutput, ExtractionRequest, OcrEngine};

/// Runs several engines on the same input concurrently and merges their
/// fields with the ensemble rule. Appears to the pipeline as one engine.
pub struct CompositeEngine {
    name: String,
    members: Vec<Arc<dyn OcrEngine>>,
}

impl CompositeEngine {
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn OcrEngine>>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name())
    }
}

#[async_trait]
impl OcrEngine for CompositeEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn engine_type(&self) -> EngineType {
        EngineType::Composite
    }

    fn is_available(&self) -> bool {
        self.members.iter().any(|m| m.is_available())
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<EngineOutput, EngineError> {
        let started = Instant::now();

        let runs = self.members.iter().map(|member| async move {
            if !member.is_available() {
                return Err(EngineError::Unavailable(format!(
                    "{} is not available",
                    member.name()
                )));
            }
            member.extract(request).await
        });
        let results = join_all(runs).await;

        let mut outputs = Vec::new();
        let mut errors = Vec::new();
        for (member, result) in self.members.iter().zip(results) {
            match result {
                Ok(output) if !output.is_empty() => outputs.push((member.name(), output)),
                Ok(_) => debug!(composite = %self.name, member = %member.name(), "Member returned empty output"),
                Err(e) => errors.push(e),
            }
        }

        if outputs.is_empty() {
            if errors.is_empty() {
                return Ok(EngineOutput {
                    duration_ms: started.elapsed().as_millis() as i64,
                    ..Default::default()
                });
            }
            if let Some(timeout) = errors.iter().find_map(|e| match e {
                EngineError::Timeout(d) => Some(*d),
                _ => None,
            }) {
                return Err(EngineError::Timeout(timeout));
            }
            if errors.iter().all(|e| matches!(e, EngineError::Unavailable(_))) {
                return Err(EngineError::Unavailable(format!(
                    "no member of {} is available",
                    self.name
                )));
            }
            let detail = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EngineError::Failed(detail));
        }

        let candidates: Vec<Candidate<'_>> = outputs
            .iter()
            .map(|(name, output)| Candidate::new(name, output))
            .collect();
        let merged = merge(&candidates);

        Ok(EngineOutput {
            text: merged.raw_text,
            fields: merged.fields,
            overall_confidence: merged.overall_confidence,
            duration_ms: started.elapsed().as_millis() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldMap, FieldValue};
    use std::time::Duration;

    struct Fixed {
        name: &'static str,
        result: Result<EngineOutput, EngineError>,
    }

    #[async_trait]
    impl OcrEngine for Fixed {
        fn name(&self) -> &str {
            self.name
        }
        fn engine_type(&self) -> EngineType {
            EngineType::Tesseract
        }
        async fn extract(&self, _request: &ExtractionRequest) -> Result<EngineOutput, EngineError> {
            self.result.clone()
        }
    }

    fn output(field: &str, confidence: f64) -> EngineOutput {
        let mut fields = FieldMap::new();
        fields.insert(field.to_string(), FieldValue::new("x", confidence));
        EngineOutput {
            text: format!("{field} text"),
            fields,
            overall_confidence: confidence,
            duration_ms: 5,
        }
    }

    fn request() -> ExtractionRequest {
        ExtractionRequest::new(vec![1u8], "image/png", "eng", Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_merges_member_fields() {
        let composite = CompositeEngine::new(
            "combo",
            vec![
                Arc::new(Fixed { name: "a", result: Ok(output("invoice_number", 0.4)) }),
                Arc::new(Fixed { name: "b", result: Ok(output("gross_total", 0.6)) }),
            ],
        );

        let merged = composite.extract(&request()).await.unwrap();
        assert_eq!(merged.fields.len(), 2);
        assert!((merged.overall_confidence - 0.5).abs() < 1e-9);
        assert_eq!(merged.fields["gross_total"].engine.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_one_member_failing_is_tolerated() {
        let composite = CompositeEngine::new(
            "combo",
            vec![
                Arc::new(Fixed { name: "a", result: Err(EngineError::Failed("boom".into())) }),
                Arc::new(Fixed { name: "b", result: Ok(output("gross_total", 0.9)) }),
            ],
        );

        let merged = composite.extract(&request()).await.unwrap();
        assert_eq!(merged.fields.len(), 1);
    }

    #[tokio::test]
    async fn test_all_unavailable_is_unavailable() {
        let composite = CompositeEngine::new(
            "combo",
            vec![
                Arc::new(Fixed { name: "a", result: Err(EngineError::Unavailable("down".into())) }),
                Arc::new(Fixed { name: "b", result: Err(EngineError::Unavailable("down".into())) }),
            ],
        );

        let result = composite.extract(&request()).await;
        assert!(matches!(result, Err(EngineError::Unavailable(_))));
        assert_eq!(composite.members().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_timeout_wins_over_other_errors() {
        let composite = CompositeEngine::new(
            "combo",
            vec![
                Arc::new(Fixed { name: "a", result: Err(EngineError::Failed("x".into())) }),
                Arc::new(Fixed {
                    name: "b",
                    result: Err(EngineError::Timeout(Duration::from_secs(3))),
                }),
            ],
        );

        let result = composite.extract(&request()).await;
        assert_eq!(result, Err(EngineError::Timeout(Duration::from_secs(3))));
    }
}
