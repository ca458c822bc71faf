pub mod auth;
pub mod order;
pub mod rider;
pub mod token;
pub mod user;
