pub mod console;
pub mod serve;
pub mod smoke;
pub mod workflow;

pub use console::ConsoleFrontEnd;
