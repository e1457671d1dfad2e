pub mod agent;
pub mod booking;
pub mod conversation;
pub mod order;
pub mod user;

/// Generates a new opaque identifier in the compact form stored by the database.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
