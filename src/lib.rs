// Lens dashboard engine: validation, layout, query execution and evaluation
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
