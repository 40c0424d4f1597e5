pub mod agent;
pub mod auth;
pub mod convert;
pub mod error;
pub mod middleware;
pub mod posts;
pub mod routes;
pub mod trending;
pub mod users;
