pub mod ast;
pub mod matcher;
pub mod parser;
pub mod types;

pub use ast::Query;
pub use parser::{parse_grammar, parse_query, parse_search_query};
pub use types::{IdxData, SortOrder};
