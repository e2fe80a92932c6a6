pub mod callback;
pub mod client_config;
pub mod credentials;
pub mod integration;
pub mod login;
pub mod logout;
pub mod models;
pub mod oauth;
pub mod secret_store;
pub mod session;
pub mod status;
