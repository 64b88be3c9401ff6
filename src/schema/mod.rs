//! Source tables and loading
//!
//! This module defines the row layouts of the four delimited inputs and the
//! loader that cleans and joins them into typed profiles and events.

mod loader;
mod raw_record;

pub use loader::*;
pub use raw_record::*;
