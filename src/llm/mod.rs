//! LLM-facing stages: the chat-provider abstraction and the batched
//! bilingual relevance/evidence refiner built on top of it.

pub mod provider;
pub mod refiner;
