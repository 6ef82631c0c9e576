#![doc = include_str!("../README.md")]

pub mod codegen;
pub mod engine;
pub mod ingest;
pub mod pipeline;
pub mod server;
pub mod store;
