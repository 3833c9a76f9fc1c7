pub mod table;

pub use table::{RowIdCursor, Table};
