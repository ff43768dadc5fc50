#![allow(dead_code)]

pub mod builders;
pub mod failing_store;
pub mod strategies;

pub use builders::*;
pub use failing_store::*;
