//! Modbuster - Modbus TCP diagnostic library
//!
//! Protocol engine behind the `modbuster` command line tool: address
//! classification, raw ADU framing, function code discovery, chunked
//! reads/writes and serial-line diagnostics.

pub mod commands;
pub mod config;
pub mod diag;
pub mod executor;
pub mod modbus;
pub mod output;
pub mod scanner;
