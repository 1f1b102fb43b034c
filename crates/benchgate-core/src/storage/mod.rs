pub mod schema;
pub mod store;
pub mod versions;

pub use store::Store;
