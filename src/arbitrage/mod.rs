//! Cross-marketplace spread detection.

pub mod detector;

pub use detector::ArbitrageDetector;
