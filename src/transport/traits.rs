//! Transport traits
//!
//! The seam between the framed TCP transport and whatever interprets the
//! frame bodies.
use async_trait::async_trait;

use crate::error::{MeridianError, Result};

/// Handles one request body and produces the response body
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle_request(&self, request: &[u8]) -> Result<Vec<u8>>;

    /// Response body for a call the transport aborted before decoding it
    fn reject(&self, error: &MeridianError) -> Result<Vec<u8>>;
}
