//! MCP (Model Context Protocol) server for ghpm-tools.
//!
//! Exposes the GitHub project-management operations of a
//! [`ghpm_core::Provider`] as MCP tools over newline-delimited stdio.

pub mod handlers;
pub mod protocol;
pub mod server;
pub mod tools;
pub mod transport;

pub use handlers::ToolHandler;
pub use server::McpServer;
