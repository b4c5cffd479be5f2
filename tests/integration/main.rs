//! Integration tests for the request engine and its stateful collaborators.

mod breaker_cache;
mod engine_lifecycle;
mod support;
