pub mod backpressure;
pub mod chunker;

pub use backpressure::*;
pub use chunker::*;
