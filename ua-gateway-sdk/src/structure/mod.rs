//! Custom structured types described by an OPC UA binary type dictionary.

mod cursor;
mod decoder;
mod dictionary;

pub use cursor::BinaryCursor;
pub use dictionary::{EnumeratedType, FieldDescription, StructuredType, TypeDictionary};
