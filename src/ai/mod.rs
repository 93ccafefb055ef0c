pub mod llm;
pub mod provider;
