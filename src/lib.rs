pub mod com;
pub mod data;
pub mod node;
pub mod storage;
