//! Prompt module for LLM-based operations.

pub mod refiner;
