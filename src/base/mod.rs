//! Base types and error handling.
//!
//! Provides foundational types shared by every layer:
//! - [`NetError`](neterror::NetError): error codes for engine, stream and transport failures
//! - [`StreamIntel`](intel::StreamIntel): metadata attached to stream callbacks

pub mod context;
pub mod intel;
pub mod neterror;
