pub mod index_schema;
pub mod registry;

pub use index_schema::{FieldDef, FieldType, IndexSchema, SorterDef, SorterType};
pub use registry::IndexRegistry;
