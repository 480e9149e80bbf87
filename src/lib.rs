#![doc = include_str!("../README.md")]

mod bitmap;
mod buffer;
mod config;
mod entry;
mod error;
mod fs;
mod hostfile;
mod node;
mod random;
mod rca;
mod store;
mod superblock;
mod token;
mod tree;
mod writer;

pub use config::Config;
pub use error::{Error, Result};
pub use store::Store;
pub use token::Token;
pub use tree::Ingest;
