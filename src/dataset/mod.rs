//! Tabular dataset handling
//!
//! Raw transaction tables are small enough to live in memory as rows of
//! strings; columns are typed lazily by the stage that consumes them.

pub mod sample;
pub mod table;

pub use sample::sample_rows;
pub use table::Table;
