pub mod app;
pub mod classify;
pub mod config;
pub mod decode;
pub mod domain;
pub mod entity;
pub mod error;
pub mod fs_util;
pub mod geo;
pub mod ingest;
pub mod output;
pub mod populate;
pub mod sample;
pub mod soft;
pub mod store;
pub mod table;
