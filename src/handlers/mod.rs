pub mod function_handlers;
pub mod health_handlers;
pub mod storage_handlers;
