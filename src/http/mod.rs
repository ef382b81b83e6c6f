pub mod headers;

// Re-exports for convenience
pub use headers::HeaderList;
