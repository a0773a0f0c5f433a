mod batch;
mod in_memory;
mod source;

pub use batch::Batch;
pub use in_memory::InMemorySource;
pub use source::DataSource;
