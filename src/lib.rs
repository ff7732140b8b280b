pub mod config;
pub mod handlers;
pub mod jobs;
pub mod mapping;
pub mod matching;
pub mod models;
pub mod pipeline;
pub mod schema;
pub mod storage;

// Convenient re-exports for tests and external callers
pub use config::*;
pub use handlers::*;
pub use jobs::*;
pub use mapping::*;
pub use matching::*;
pub use models::*;
pub use pipeline::*;
pub use storage::*;
