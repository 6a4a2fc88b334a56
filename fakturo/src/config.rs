use serde::Deserialize;
use std::env;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) if val.trim().is_empty() => None,
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Parse a confidence-like value and clamp it into `[0, 1]`.
fn parse_unit_env_or(var: &str, default: f64) -> f64 {
    let value: f64 = parse_env_or(var, default);
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        let clamped = if value.is_nan() { default } else { value.clamp(0.0, 1.0) };
        tracing::warn!(
            "{} must be within [0, 1], got {}. Clamping to {}.",
            var,
            value,
            clamped
        );
        return clamped;
    }
    value
}

/// Parse a comma-separated list, dropping empty items.
fn parse_list_env(var: &str, default: &[&str]) -> Vec<String> {
    match env::var(var) {
        Ok(val) if !val.trim().is_empty() => val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

pub const DEFAULT_ALLOWED_MIME_TYPES: &[&str] =
    &["application/pdf", "image/jpeg", "image/png", "image/tiff"];

pub const DEFAULT_CRITICAL_FIELDS: &[&str] = &["invoice_number", "issue_date", "gross_total"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ingestion: IngestionConfig,
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
    pub ocr: OcrConfig,
    pub downstream: DownstreamConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub auth_token: Option<String>,
    pub local_path: Option<String>,
    pub busy_timeout_ms: u64,
    pub journal_mode: String,
    pub synchronous: String,
}

impl DatabaseConfig {
    /// Local database at `url` with default pragmas.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            local_path: None,
            busy_timeout_ms: 5000,
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    pub max_upload_bytes: usize,
    pub allowed_mime_types: Vec<String>,
}

/// Thresholds and sizing for the orchestration loop.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// A single engine at or above this confidence is accepted immediately.
    pub acceptance_threshold: f64,
    /// Outputs below this confidence are treated as unusable.
    pub confidence_floor: f64,
    /// Results below this confidence get one retry with preprocessing.
    pub preprocessing_retry_threshold: f64,
    pub critical_fields: Vec<String>,
    pub critical_field_min_confidence: f64,
    pub language: String,
    pub worker_count: usize,
    pub job_queue_capacity: usize,
    pub sweep_interval_secs: u64,
    pub stale_queue_secs: u64,
    pub stats_smoothing: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub escalate_after: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    pub languages: String,
    pub tesseract_priority: i64,
    pub timeout_secs: u64,
    pub vision_model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub vision_priority: i64,
    pub max_image_dimension: u32,
    pub min_image_dimension: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownstreamConfig {
    pub invoice_webhook_url: Option<String>,
    pub review_webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.8,
            confidence_floor: 0.05,
            preprocessing_retry_threshold: 0.45,
            critical_fields: DEFAULT_CRITICAL_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            critical_field_min_confidence: 0.5,
            language: "eng".to_string(),
            worker_count: 4,
            job_queue_capacity: 256,
            sweep_interval_secs: 10,
            stale_queue_secs: 300,
            stats_smoothing: 0.2,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 30,
            max_delay_secs: 3600,
            escalate_after: 2,
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: "eng".to_string(),
            tesseract_priority: 10,
            timeout_secs: 60,
            vision_model: None,
            api_key: None,
            base_url: None,
            vision_priority: 20,
            max_image_dimension: 4096,
            min_image_dimension: 50,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let pipeline_defaults = PipelineConfig::default();
        let retry_defaults = RetryConfig::default();
        let ocr_defaults = OcrConfig::default();
        let ingestion_defaults = IngestionConfig::default();

        Self {
            server: ServerConfig {
                host: env::var("FAKTURO_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env_or("FAKTURO_PORT", 3000),
                api_keys: env::var("FAKTURO_API_KEYS")
                    .map(|keys| {
                        keys.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "file:fakturo.db".to_string()),
                auth_token: env::var("DATABASE_AUTH_TOKEN").ok(),
                local_path: env::var("DATABASE_LOCAL_PATH").ok(),
                busy_timeout_ms: parse_env_or("DATABASE_BUSY_TIMEOUT_MS", 5000),
                journal_mode: env::var("DATABASE_JOURNAL_MODE")
                    .unwrap_or_else(|_| "WAL".to_string()),
                synchronous: env::var("DATABASE_SYNCHRONOUS")
                    .unwrap_or_else(|_| "NORMAL".to_string()),
            },
            ingestion: IngestionConfig {
                max_upload_bytes: parse_env_or(
                    "MAX_UPLOAD_BYTES",
                    ingestion_defaults.max_upload_bytes,
                ),
                allowed_mime_types: parse_list_env(
                    "ALLOWED_MIME_TYPES",
                    DEFAULT_ALLOWED_MIME_TYPES,
                ),
            },
            pipeline: PipelineConfig {
                acceptance_threshold: parse_unit_env_or(
                    "ACCEPTANCE_THRESHOLD",
                    pipeline_defaults.acceptance_threshold,
                ),
                confidence_floor: parse_unit_env_or(
                    "CONFIDENCE_FLOOR",
                    pipeline_defaults.confidence_floor,
                ),
                preprocessing_retry_threshold: parse_unit_env_or(
                    "PREPROCESSING_RETRY_THRESHOLD",
                    pipeline_defaults.preprocessing_retry_threshold,
                ),
                critical_fields: parse_list_env("CRITICAL_FIELDS", DEFAULT_CRITICAL_FIELDS),
                critical_field_min_confidence: parse_unit_env_or(
                    "CRITICAL_FIELD_MIN_CONFIDENCE",
                    pipeline_defaults.critical_field_min_confidence,
                ),
                language: env::var("OCR_LANGUAGE").unwrap_or(pipeline_defaults.language),
                worker_count: parse_env_or("WORKER_COUNT", pipeline_defaults.worker_count).max(1),
                job_queue_capacity: parse_env_or(
                    "JOB_QUEUE_CAPACITY",
                    pipeline_defaults.job_queue_capacity,
                )
                .max(1),
                sweep_interval_secs: parse_env_or(
                    "SWEEP_INTERVAL_SECS",
                    pipeline_defaults.sweep_interval_secs,
                )
                .max(1),
                stale_queue_secs: parse_env_or(
                    "STALE_QUEUE_SECS",
                    pipeline_defaults.stale_queue_secs,
                ),
                stats_smoothing: parse_unit_env_or(
                    "STATS_SMOOTHING",
                    pipeline_defaults.stats_smoothing,
                ),
            },
            retry: RetryConfig {
                max_retries: parse_env_or("MAX_RETRIES", retry_defaults.max_retries),
                base_delay_secs: parse_env_or(
                    "RETRY_BASE_DELAY_SECS",
                    retry_defaults.base_delay_secs,
                ),
                max_delay_secs: parse_env_or("RETRY_MAX_DELAY_SECS", retry_defaults.max_delay_secs),
                escalate_after: parse_env_or("RETRY_ESCALATE_AFTER", retry_defaults.escalate_after)
                    .max(1),
            },
            ocr: OcrConfig {
                languages: env::var("TESSERACT_LANGUAGES").unwrap_or(ocr_defaults.languages),
                tesseract_priority: parse_env_or(
                    "TESSERACT_PRIORITY",
                    ocr_defaults.tesseract_priority,
                ),
                timeout_secs: parse_env_or("OCR_TIMEOUT", ocr_defaults.timeout_secs),
                vision_model: parse_env_opt("OCR_VISION_MODEL"),
                api_key: parse_env_opt("OCR_API_KEY"),
                base_url: parse_env_opt("OCR_BASE_URL"),
                vision_priority: parse_env_or("OCR_VISION_PRIORITY", ocr_defaults.vision_priority),
                max_image_dimension: parse_env_or(
                    "OCR_MAX_DIMENSION",
                    ocr_defaults.max_image_dimension,
                ),
                min_image_dimension: parse_env_or(
                    "OCR_MIN_DIMENSION",
                    ocr_defaults.min_image_dimension,
                ),
            },
            downstream: DownstreamConfig {
                invoice_webhook_url: parse_env_opt("INVOICE_WEBHOOK_URL"),
                review_webhook_url: parse_env_opt("REVIEW_WEBHOOK_URL"),
                timeout_secs: parse_env_or("DOWNSTREAM_TIMEOUT", 30),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const PIPELINE_VARS: &[&str] = &[
        "ACCEPTANCE_THRESHOLD",
        "CONFIDENCE_FLOOR",
        "CRITICAL_FIELDS",
        "MAX_UPLOAD_BYTES",
        "ALLOWED_MIME_TYPES",
        "MAX_RETRIES",
        "WORKER_COUNT",
        "OCR_VISION_MODEL",
    ];

    fn clear_vars() {
        for var in PIPELINE_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_pipeline_defaults() {
        clear_vars();
        let config = Config::default();
        assert_eq!(config.pipeline.acceptance_threshold, 0.8);
        assert_eq!(config.pipeline.confidence_floor, 0.05);
        assert_eq!(config.pipeline.worker_count, 4);
        assert_eq!(
            config.pipeline.critical_fields,
            vec!["invoice_number", "issue_date", "gross_total"]
        );
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.escalate_after, 2);
        assert_eq!(config.ingestion.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.ingestion.allowed_mime_types.len(), 4);
        assert!(config.ocr.vision_model.is_none());
    }

    #[test]
    #[serial]
    fn test_threshold_is_clamped() {
        clear_vars();
        std::env::set_var("ACCEPTANCE_THRESHOLD", "1.7");
        std::env::set_var("CONFIDENCE_FLOOR", "-0.2");
        let config = Config::default();
        assert_eq!(config.pipeline.acceptance_threshold, 1.0);
        assert_eq!(config.pipeline.confidence_floor, 0.0);
        clear_vars();
    }

    #[test]
    #[serial]
    fn test_invalid_value_falls_back_to_default() {
        clear_vars();
        std::env::set_var("MAX_RETRIES", "lots");
        let config = Config::default();
        assert_eq!(config.retry.max_retries, 3);
        clear_vars();
    }

    #[test]
    #[serial]
    fn test_lists_from_env() {
        clear_vars();
        std::env::set_var("CRITICAL_FIELDS", "invoice_number, seller_tax_id,,");
        std::env::set_var("ALLOWED_MIME_TYPES", "application/pdf");
        std::env::set_var("MAX_UPLOAD_BYTES", "2048");
        let config = Config::default();
        assert_eq!(
            config.pipeline.critical_fields,
            vec!["invoice_number", "seller_tax_id"]
        );
        assert_eq!(config.ingestion.allowed_mime_types, vec!["application/pdf"]);
        assert_eq!(config.ingestion.max_upload_bytes, 2048);
        clear_vars();
    }

    #[test]
    #[serial]
    fn test_worker_count_never_zero() {
        clear_vars();
        std::env::set_var("WORKER_COUNT", "0");
        let config = Config::default();
        assert_eq!(config.pipeline.worker_count, 1);
        clear_vars();
    }

    #[test]
    #[serial]
    fn test_empty_optional_is_none() {
        clear_vars();
        std::env::set_var("OCR_VISION_MODEL", "  ");
        let config = Config::default();
        assert!(config.ocr.vision_model.is_none());
        clear_vars();
    }
}
