//! Core types, config, errors, push channels and storage for Palette.

pub mod canvas;
pub mod config;
pub mod error;
pub mod protocol;
pub mod push;
pub mod session;
pub mod store;
pub mod types;
