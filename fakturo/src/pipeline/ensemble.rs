use crate::models::{clamp_confidence, FieldMap};
use crate::ocr::EngineOutput;

/// One engine's usable output, in the order the engine was tried.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub engine: &'a str,
    pub output: &'a EngineOutput,
}

impl<'a> Candidate<'a> {
    pub fn new(engine: &'a str, output: &'a EngineOutput) -> Self {
        Self { engine, output }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedFields {
    pub fields: FieldMap,
    pub overall_confidence: f64,
    pub raw_text: String,
    pub engines: Vec<String>,
}

/// Per-field merge across candidates.
///
/// Each field takes the value with the highest field confidence; on a tie the
/// candidate tried first wins. Overall confidence is the mean of the chosen
/// field confidences. Raw text comes from the candidate with the best overall
/// confidence, again preferring the earlier one on a tie.
///
/// Candidates that carry text but no fields only contribute raw text; if no
/// candidate has fields the best overall confidence is used instead of a mean.
pub fn merge(candidates: &[Candidate<'_>]) -> MergedFields {
    let mut fields = FieldMap::new();

    for candidate in candidates {
        for (name, value) in &candidate.output.fields {
            let replace = match fields.get(name) {
                Some(current) => value.confidence > current.confidence,
                None => true,
            };
            if replace {
                fields.insert(name.clone(), value.clone().from_engine(candidate.engine));
            }
        }
    }

    let best = candidates.iter().fold(None::<&Candidate<'_>>, |best, c| match best {
        Some(b) if b.output.overall_confidence >= c.output.overall_confidence => Some(b),
        _ => Some(c),
    });

    let overall_confidence = if fields.is_empty() {
        best.map(|c| c.output.overall_confidence).unwrap_or(0.0)
    } else {
        fields.values().map(|f| f.confidence).sum::<f64>() / fields.len() as f64
    };

    MergedFields {
        fields,
        overall_confidence: clamp_confidence(overall_confidence),
        raw_text: best.map(|c| c.output.text.clone()).unwrap_or_default(),
        engines: candidates.iter().map(|c| c.engine.to_string()).collect(),
    }
}
