pub mod account;
pub mod auth;
pub mod bets;
pub mod callbacks;
pub mod health;
pub mod payments;
