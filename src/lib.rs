pub mod engine;
pub mod shared;
