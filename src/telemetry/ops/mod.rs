pub mod retrieve;
pub mod process;
pub mod serve;
