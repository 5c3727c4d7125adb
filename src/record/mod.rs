pub mod store;

pub use store::{id_hash_path, RecordStore};
