pub mod accounts;
pub mod auth;
pub mod directory;
pub mod memberships;
pub mod notifications;
pub mod relationships;
