pub mod group;
pub mod join_request;
pub(crate) mod macros;
pub mod membership;
pub mod message;
pub mod profile;

// Re-export all models for easy importing
pub use group::*;
pub use join_request::*;
pub use membership::*;
pub use message::*;
pub use profile::*;
