//! httpd - an HTTP/1.x server engine
//!
//! Core library for connection handling, request and response framing,
//! multipart forms and routing.

pub mod config;
pub mod http;
pub mod server;
