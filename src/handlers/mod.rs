pub mod groups;
pub mod join_requests;
pub mod messages;
pub mod shared;
