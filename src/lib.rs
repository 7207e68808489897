pub mod accounts;
pub mod admin;
pub mod cache;
pub mod channels;
pub mod core;
pub mod gateway;
pub mod main_module;
pub mod reports;
pub mod security;
pub mod store;
