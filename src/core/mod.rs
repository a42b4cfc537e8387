pub mod aggregate;
pub mod batch;
pub mod engine;
pub mod error;
pub mod executor;
pub mod io;
pub mod metadata;
pub mod parser;
pub mod quality;
pub mod source;
pub mod stats;
