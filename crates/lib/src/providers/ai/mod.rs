pub mod embedding;
pub mod local;

use crate::errors::AiError;
use async_trait::async_trait;
use dyn_clone::DynClone;
use futures::stream::BoxStream;
use std::fmt::Debug;

pub use embedding::EmbeddingClient;
pub use local::LocalAiProvider;

/// An ordered stream of response fragments, in model emission order.
pub type TokenStream = BoxStream<'static, Result<String, AiError>>;

/// A trait for interacting with an AI provider.
///
/// This trait defines a common interface for generating answers from a
/// system and user prompt against different chat-completion backends.
#[async_trait]
pub trait AiProvider: Send + Sync + Debug + DynClone {
    /// Generates a complete response from a given system and user prompt.
    async fn generate(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, AiError>;

    /// Generates a response as a stream of text fragments.
    ///
    /// The returned stream ends when the provider signals completion; a
    /// transport failure mid-stream surfaces as an `Err` item.
    async fn generate_stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<TokenStream, AiError>;
}

dyn_clone::clone_trait_object!(AiProvider);
