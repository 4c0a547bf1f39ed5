pub mod aggregate;
pub mod app;
pub mod config;
pub mod credentials;
pub mod tmdb;
