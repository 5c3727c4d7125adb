pub mod inverted;
pub mod posting;

pub use inverted::InvertedIndex;
pub use posting::PostingList;
