//! Database query functions organized by table.

pub mod encounters;
pub mod kv;
