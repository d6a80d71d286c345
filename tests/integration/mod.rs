//! Integration tests for the feedbuild pipeline

mod archive;
mod build_context;
mod build_queue;
mod builder;
mod config_integration;
mod download_queue;
mod http_fetch;
mod service;
