pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod feedback;
pub mod generator;
pub mod llm;
pub mod logger;
pub mod mdx;
pub mod memory;
pub mod prompts;
pub mod response;
pub mod sanitize;
pub mod session;
pub mod versions;

pub use agent::tools;

#[cfg(test)]
mod test_support;
