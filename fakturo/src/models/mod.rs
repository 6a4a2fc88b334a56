mod attempt;
mod audit;
mod common;
mod document;
mod engine;
mod result;
mod review;

pub use attempt::*;
pub use audit::*;
pub use common::*;
pub use document::*;
pub use engine::*;
pub use result::*;
pub use review::*;

pub type Metadata = std::collections::HashMap<String, serde_json::Value>;
