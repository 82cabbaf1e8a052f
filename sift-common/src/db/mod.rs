//! Database bootstrap shared by PhotoSift services

pub mod init;

pub use init::*;
