pub mod documents;
pub mod engines;
pub(crate) mod health;
pub mod reviews;

pub use health::health_check;
