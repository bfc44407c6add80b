pub mod collection_repository;
pub mod user_repository;
