//! Core data types shared by every pipeline stage.

pub mod row;

pub use row::{ProcessedRow, RawRow};
