//! Unpacking of the bundled sample database archive.
//!
//! Archives are read entry by entry in archive order and written below a
//! destination directory. Nothing is cleaned up on failure, the caller owns
//! the destination and decides what to do with a partially populated tree.

mod error;
pub mod extract;

pub use error::ExtractError;
pub use extract::{ExtractOptions, ExtractSummary, extract_zip, extract_zip_file, extract_zip_with};
