//! Fakturo: an OCR pipeline that turns scanned invoices into structured,
//! confidence-scored fields.
//!
//! The [`pipeline::Pipeline`] owns the document lifecycle; [`api`] exposes it
//! over HTTP. OCR engines implement [`ocr::OcrEngine`] and are registered
//! with a [`pipeline::EngineRegistry`] at startup.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod ocr;
pub mod pipeline;
