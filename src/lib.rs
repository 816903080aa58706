pub mod app;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod instance;
pub mod port;
pub mod rpc;
pub mod supervisor;
pub mod workflow;
