pub mod api;
pub mod archive;
pub mod artifact;
pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod guests;
pub mod import;
pub mod notify;
