//! Skew lifecycle resolution: which group-versions and resources a component
//! serves at its emulation version, and which version it stores them in.

#![forbid(unsafe_code)]

pub mod encoding;
pub mod expiration;
pub mod resource_config;
pub mod source;

pub use encoding::{storage_encoding_for, EncodingError, ResourceEncodingConfig};
pub use expiration::{
    should_remove_resource_and_subresources, EvaluatorError, EvaluatorOptions, LifecycleAware, ResourceExpirationEvaluator,
};
pub use resource_config::ResourceConfig;
pub use source::{ApiLifecycle, LifecycleRegistry, LifecycleSource};
