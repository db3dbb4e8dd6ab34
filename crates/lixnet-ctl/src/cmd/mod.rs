//! CLI command modules.

pub mod call;
pub mod http;
