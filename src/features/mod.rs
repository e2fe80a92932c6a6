pub mod auth;
pub mod report;
