//! Core business logic module

pub mod catalog;
pub mod coordinator;
mod deadline;
pub mod discovery;
pub mod error;
pub mod events;
pub mod filter;
pub mod provisioning;
pub mod scanner;
pub mod selectable;
pub mod types;
