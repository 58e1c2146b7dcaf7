pub mod drain;
pub mod error;
pub mod process;
pub mod supervisor;
