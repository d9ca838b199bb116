pub mod refresh;
pub mod supervisor;
