pub mod sql;
pub mod time;
