pub mod account_handlers;
pub mod health_handlers;
pub mod object_handlers;
pub mod order_handlers;
pub mod upload_handlers;
