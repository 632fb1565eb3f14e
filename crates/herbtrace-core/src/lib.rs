pub mod canonical;
pub mod error;
pub mod identity;
pub mod masking;
pub mod memory;
pub mod operations;
pub mod store;
pub mod transitions;
pub mod types;
