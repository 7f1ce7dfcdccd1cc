//! `nodes` crate — typed node configs, the `NodeExecutor` trait, and the
//! built-in executors (extract_text, generative_ai, formatter, agent).
//!
//! The engine crate dispatches execution through [`execute`]; executors are
//! referentially pure given their config, input, and [`Services`].

pub mod agent;
pub mod config;
pub mod error;
pub mod extract;
pub mod formatter;
pub mod generative;
pub mod llm;
pub mod mock;
pub mod traits;

pub use config::{NodeConfig, NodeType};
pub use error::NodeError;
pub use llm::LlmClient;
pub use traits::{execute, FileStore, NodeExecutor, Services};
