pub mod fabric;
pub mod pool;
