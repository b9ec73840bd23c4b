pub mod auth;
pub mod chat;
pub mod membership;
pub mod profiles;

pub use auth::Claims;
pub use chat::{ChatRelay, ChatSession, ChatView, SubscriptionState};
pub use membership::{GroupSnapshot, MembershipEngine, derive_relationship, member_count};
pub use profiles::ProfileDirectory;
