pub mod result;
pub mod runner;
pub mod scheduler;
pub mod testcase;

pub use result::*;
pub use runner::*;
pub use scheduler::*;
pub use testcase::*;
