pub mod cli;
pub mod collector;
pub mod config;
pub mod delivery;
pub mod receiver;
pub mod reducer;
pub mod sensor;
pub mod storage;
