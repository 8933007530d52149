//! HTTP-facing helpers. Routing is left to the embedding service.

pub mod content_negotiation;
pub mod headers;
