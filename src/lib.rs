pub mod config;
pub mod dedup;
pub mod document;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod http_client;
pub mod logging;
pub mod pipeline;
pub mod postgres_store;
pub mod provenance;
pub mod records;
pub mod sqlite_store;
pub mod storage;
