pub mod entity;
pub mod error;
pub mod lease;
pub mod port;
