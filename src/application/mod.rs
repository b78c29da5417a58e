// Application layer - Validation, layout, execution, caching and evaluation
pub mod cache;
pub mod caching_executor;
pub mod data_source;
pub mod evaluator;
pub mod executor;
pub mod interpolation;
pub mod layout_engine;
pub mod overlap;
pub mod registry;
pub mod responsive;
pub mod streaming_service;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;
