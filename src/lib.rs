//! LoveCakes backend library.
//!
//! A storefront backend that serves product and order data by invoking stored
//! procedures on SQL Server. The core is the stored procedure gateway in [`db`];
//! the [`http`] module is a thin axum shell around it.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod models;

pub use config::Config;
pub use db::{Gateway, MssqlGateway};
pub use error::DbError;
