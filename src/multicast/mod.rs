pub mod dedup;
pub mod disseminator;

pub use dedup::DuplicateFilter;
pub use disseminator::Multicast;
