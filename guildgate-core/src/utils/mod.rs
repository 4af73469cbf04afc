pub mod pagination;

pub use pagination::{paginate, Page};
