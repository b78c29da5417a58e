// Infrastructure layer - Configuration, dashboard files, backends and HTTP encoding
pub mod chunked_json;
pub mod config;
pub mod dashboard_store;
pub mod http_response;
pub mod influx;
pub mod postgres;
pub mod query_guard;
