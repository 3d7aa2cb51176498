//! Primary data store seam.

pub mod memory;
pub mod traits;

pub use memory::InMemoryDataStore;
pub use traits::{DataStore, StoreError};
