pub mod hashing;
pub mod net;

// Re-exports for convenience
pub use hashing::fingerprint;
pub use net::default_http_client;
