//! Event normalization and windowed analytics (C3, C5).

pub mod analytics;
pub mod normalizer;

pub use analytics::{Analytics, AnalyticsEngine, RateMetrics, Resolution};
pub use normalizer::{EventNormalizer, RawEvent};
