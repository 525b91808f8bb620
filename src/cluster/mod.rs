pub mod client;
pub mod membership;
pub mod operations;
pub mod router;
