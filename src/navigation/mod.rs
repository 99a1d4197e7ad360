pub mod data;
pub mod storage;
pub mod tool;
