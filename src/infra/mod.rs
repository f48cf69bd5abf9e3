pub mod db;
pub mod queue;
pub mod store;
