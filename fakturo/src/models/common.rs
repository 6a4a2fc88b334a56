use serde::{Deserialize, Serialize};

/// Lifecycle of an uploaded document.
///
/// Legacy status strings are accepted by [`FromStr`](std::str::FromStr) as
/// aliases of the states below; they are never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Uploaded,
    Queued,
    Processing,
    OcrCompleted,
    IntegrationProcessing,
    Completed,
    ManualReviewRequired,
    RetryScheduled,
    Failed,
    Cancelled,
    Rejected,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 11] = [
        Self::Uploaded,
        Self::Queued,
        Self::Processing,
        Self::OcrCompleted,
        Self::IntegrationProcessing,
        Self::Completed,
        Self::ManualReviewRequired,
        Self::RetryScheduled,
        Self::Failed,
        Self::Cancelled,
        Self::Rejected,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Rejected
        )
    }

    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;

        if next == Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Uploaded, Queued)
                | (Uploaded, Rejected)
                | (Queued, Processing)
                | (Processing, OcrCompleted)
                | (Processing, RetryScheduled)
                | (Processing, Failed)
                | (Processing, ManualReviewRequired)
                | (Processing, Queued)
                | (OcrCompleted, ManualReviewRequired)
                | (OcrCompleted, IntegrationProcessing)
                | (IntegrationProcessing, Completed)
                | (IntegrationProcessing, ManualReviewRequired)
                | (RetryScheduled, Queued)
                | (ManualReviewRequired, Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::OcrCompleted => "ocr_completed",
            Self::IntegrationProcessing => "integration_processing",
            Self::Completed => "completed",
            Self::ManualReviewRequired => "manual_review_required",
            Self::RetryScheduled => "retry_scheduled",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "uploaded" => Ok(Self::Uploaded),
            "queued" | "pending" => Ok(Self::Queued),
            "processing" | "ocr_processing" => Ok(Self::Processing),
            "ocr_completed" => Ok(Self::OcrCompleted),
            "integration_processing" => Ok(Self::IntegrationProcessing),
            "completed" | "done" | "integrated" => Ok(Self::Completed),
            "manual_review_required" | "manual_review" => Ok(Self::ManualReviewRequired),
            "retry_scheduled" | "retry_pending" => Ok(Self::RetryScheduled),
            "failed" | "ocr_failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Unknown document status: {s}")),
        }
    }
}

/// Capability family of an OCR engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    Tesseract,
    NeuralNet,
    Composite,
}

impl std::fmt::Display for EngineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tesseract => write!(f, "tesseract"),
            Self::NeuralNet => write!(f, "neural_net"),
            Self::Composite => write!(f, "composite"),
        }
    }
}

impl std::str::FromStr for EngineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tesseract" => Ok(Self::Tesseract),
            "neural_net" | "neural" => Ok(Self::NeuralNet),
            "composite" => Ok(Self::Composite),
            _ => Err(format!("Unknown engine type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Preprocessing,
    TextExtraction,
    FieldExtraction,
    ConfidenceScoring,
    Validation,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preprocessing => write!(f, "preprocessing"),
            Self::TextExtraction => write!(f, "text_extraction"),
            Self::FieldExtraction => write!(f, "field_extraction"),
            Self::ConfidenceScoring => write!(f, "confidence_scoring"),
            Self::Validation => write!(f, "validation"),
        }
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preprocessing" => Ok(Self::Preprocessing),
            "text_extraction" => Ok(Self::TextExtraction),
            "field_extraction" => Ok(Self::FieldExtraction),
            "confidence_scoring" => Ok(Self::ConfidenceScoring),
            "validation" => Ok(Self::Validation),
            _ => Err(format!("Unknown step type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Succeeded,
    /// The engine ran but produced nothing usable.
    Empty,
    Unavailable,
    TimedOut,
    Failed,
}

impl AttemptStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Empty => write!(f, "empty"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_progress" => Ok(Self::InProgress),
            "succeeded" => Ok(Self::Succeeded),
            "empty" => Ok(Self::Empty),
            "unavailable" => Ok(Self::Unavailable),
            "timed_out" => Ok(Self::TimedOut),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown attempt status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Accepted,
    #[default]
    NeedsReview,
    Rejected,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::NeedsReview => write!(f, "needs_review"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for Disposition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accepted" => Ok(Self::Accepted),
            "needs_review" => Ok(Self::NeedsReview),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Unknown disposition: {s}")),
        }
    }
}

/// Strategy tag attached to a scheduled retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    SameEngine,
    DifferentEngine,
    WithPreprocessing,
}

impl std::fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SameEngine => write!(f, "same-engine"),
            Self::DifferentEngine => write!(f, "different-engine"),
            Self::WithPreprocessing => write!(f, "with-preprocessing"),
        }
    }
}

impl std::str::FromStr for RetryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "same-engine" => Ok(Self::SameEngine),
            "different-engine" => Ok(Self::DifferentEngine),
            "with-preprocessing" => Ok(Self::WithPreprocessing),
            _ => Err(format!("Unknown retry strategy: {s}")),
        }
    }
}
