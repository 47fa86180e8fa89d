pub mod commands;
pub mod demo;

pub use commands::{Cli, Commands, ConfigCommand};
pub use demo::{run_demo, DemoOptions, DemoReport, LoopbackTransport};
