pub mod calls;
pub mod config;
pub mod confirmation;
pub mod creation;
pub mod error;
pub mod legacy;
pub mod lifecycle;
pub mod matcher;
pub mod request_response;
pub mod service;
pub mod store;
pub mod trip;
pub mod utils;
