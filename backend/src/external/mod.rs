//! External API integrations

pub mod retry;
pub mod sales_analytics;

pub use retry::{retry_with_classifier, ErrorClass, RetryPolicy};
pub use sales_analytics::{SalesAnalyticsClient, SalesSource, SourceError};
