pub mod parser;
pub mod storage;
