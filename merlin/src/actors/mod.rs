pub mod reconcile;
pub mod rest;
pub mod store;
