//! IDShield vault backend: user vault records, access-control workflow, claim sharing and
//! doctor-facing medical form links, served over HTTP.

pub mod api;
pub mod config;
pub mod dto;
pub mod errors;
pub mod models;
pub mod objects;
pub mod state;
pub mod storage;

pub use api::router;
