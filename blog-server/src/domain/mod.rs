pub mod error;
pub mod query;
pub mod schema;
pub mod user;
