//! Shared setup for the FreeRangeNotify binaries.

pub mod config;
