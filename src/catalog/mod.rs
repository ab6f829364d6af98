//! Game catalog (Steam store)
//!
//! Name search and requirement lookup over the public store endpoints.

mod client;
mod markup;
mod types;

pub use client::{CatalogClient, CatalogError};
pub use types::{GameRecord, RequirementSet};
