//! Speech synthesis engines.
//!
//! This module contains implementations of text-to-speech engines.
//!
//! # Available Engines
//!
//! Enable engines via Cargo features:
//! - `unit` - Recorded word units with HMM and regressor-guided synthesis

#[cfg(feature = "unit")]
pub mod unit;
