//! Shared plumbing for the norn binaries

pub mod common;
