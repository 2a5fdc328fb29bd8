//! Concrete model-service adapters.
//!
//! The pipeline only knows the [`crate::pipeline::llm::ModelService`] trait;
//! this module provides the HTTP implementation used outside tests.

pub mod openai;
pub mod sse;

pub use openai::{OpenAiService, OpenAiThreads};
