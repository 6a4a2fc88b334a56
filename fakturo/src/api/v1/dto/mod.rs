//! v1 API Data Transfer Objects.
//!
//! Wire format for the v1 REST API, kept separate from the domain models in
//! `src/models/`. Field names are camelCase on the wire.

pub mod common;
pub mod documents;
pub mod engines;
pub mod reviews;

pub use common::*;
pub use documents::*;
pub use engines::*;
pub use reviews::*;
