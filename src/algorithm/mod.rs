pub mod error_classifier;
pub mod mastery;

pub use error_classifier::ErrorClassifier;
