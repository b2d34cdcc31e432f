//! Model gateway implementations for Cairn.
//!
//! Every gateway implements [`cairn_core::ModelGateway`]; the agent never
//! knows which backend it is talking to.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatGateway;
