pub mod cancel;
pub mod color;
pub mod lines;
pub mod rolling_log;
pub mod shell;
