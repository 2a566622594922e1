//! Persistence of the plane's tables in rocksdb.

mod records;
mod schema;
pub mod store_impl;

pub use records::*;
pub use store_impl::Store;

#[cfg(test)]
mod tests;
