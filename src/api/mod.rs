//! Outbound adapters for the case backend REST API.

mod client;

pub use client::HttpCaseService;
