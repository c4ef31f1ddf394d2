//! Core session and API plumbing for the SGCD PM client

pub mod auth;
pub mod client;
pub mod config;
