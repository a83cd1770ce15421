//! This crate provides common functionality that the other crates in the workspace can benefit
//! from: cancellable bounded polling and filesystem reclamation.

pub mod fs;
pub mod polling;
