mod client;
mod scanner;
mod types;

pub use client::{GenerationBackend, GradioClient};
pub use scanner::{Completion, StreamScanner};
pub use types::{GenerationParams, GenerationResult, SeedSpec};
