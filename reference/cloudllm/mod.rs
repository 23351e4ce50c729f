// src/cloudllm/mod.rs

pub mod client_wrapper;
pub mod clients;
pub mod council;
pub mod llm_session;
pub mod tool_adapters;
pub mod tool_protocol;

// Let's explicitly export LLMSession so we don't have to access it via cloudllm::llm_session::LLMSession
// and instead as cloudllm::LLMSession
pub use llm_session::LLMSession;
