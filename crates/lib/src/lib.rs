//! sage core library: saged protocol client, project descriptor, and the remote-control
//! view model used by the CLI.

pub mod board;
pub mod client;
pub mod config;
pub mod init;
pub mod project;
