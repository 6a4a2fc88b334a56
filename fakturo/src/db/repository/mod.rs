mod attempts;
mod audit;
mod documents;
mod engines;
mod results;
mod reviews;

pub use attempts::AttemptRepository;
pub use audit::AuditRepository;
pub use documents::DocumentRepository;
pub use engines::EngineRepository;
pub use results::ResultRepository;
pub use reviews::ReviewRepository;

use chrono::{DateTime, Utc};

pub(crate) fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_optional_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|v| {
        DateTime::parse_from_rfc3339(&v)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

#[cfg(test)]
pub(crate) async fn setup_test_db() -> libsql::Connection {
    let conn = libsql::Builder::new_local(":memory:")
        .build()
        .await
        .unwrap()
        .connect()
        .unwrap();
    crate::db::schema::init_schema(&conn).await.unwrap();
    conn
}
