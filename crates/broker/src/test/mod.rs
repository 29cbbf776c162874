//! Integration tests for the Broker's HTTP surface: a real axum listener, a
//! real reqwest client, and wiremock standing in for upstream MCP servers.

pub mod fixtures;
