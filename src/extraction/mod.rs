// Upstream text extraction: the HTTP client with rate-limit retry and the
// JSON-in-text response parser

pub mod client;
pub mod json;

pub use client::{
    CompletionBackend, CompletionRequest, CompletionResponse, ExtractionError,
    ReqwestCompletionBackend, RetryPolicy, TextExtractionClient, TextExtractor,
};
pub use json::{extract_json_object, JsonExtractError};
