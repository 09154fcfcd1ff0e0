mod block_source;
mod query_source;
mod repository;

pub use block_source::*;
pub use query_source::*;
pub use repository::*;
