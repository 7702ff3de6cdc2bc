pub mod config;
pub mod transfer;

#[macro_use]
extern crate log;
