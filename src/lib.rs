pub mod assemble;
pub mod cache;
pub mod candidates;
pub mod config;
pub mod constants;
pub mod dedup;
pub mod export;
pub mod matcher;
pub mod mosthosts_errors;
pub mod night;
pub mod observations;
pub mod output;
pub mod pipeline;
pub mod reconcile;
pub mod release;
pub mod skyportal;
pub mod sky;
pub mod spectrum;
pub mod store;
