pub mod auth_service;
pub mod data_service;
pub mod storage_service;
