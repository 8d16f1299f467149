pub mod account_service;
pub mod credentials;
pub mod delegation;
pub mod downstream;
pub mod inventory_service;
pub mod pipeline;
pub mod reconcile;
pub mod retry;
pub mod sanitizer;
pub mod storage_service;
pub mod verifier;
