//! Free-function tree algorithms shared by the single-threaded and OLC-layered
//! variants: lookup, insert, delete, and ordered iteration (component B).

pub mod delete;
pub mod insert;
pub mod iterator;
pub mod lookup;

pub use delete::delete;
pub use insert::insert;
pub use iterator::RawIter;
pub use lookup::lookup;
