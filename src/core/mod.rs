pub mod error;
pub mod row;
pub mod schema;
pub mod value;

pub use error::EngineError;
pub use row::Row;
pub use schema::{Column, IndexDef, Schema, META_SUFFIX};
pub use value::{DataType, Value};
