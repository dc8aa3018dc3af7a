pub mod cache;
pub mod codec;
pub mod config;
pub mod database;
pub mod lexicon;
pub mod payload;
pub mod storage;
