//! SGCD PM - Project management client core
//!
//! Session handling for the SGCD project-management API: token storage,
//! login/logout, transparent token refresh, route guarding and an
//! authenticated JSON client.

pub mod core;
