pub mod handlers;
pub mod index_manager;
pub mod requests;
