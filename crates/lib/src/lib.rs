//! Agent chat core library: persistent connection to the agent service, request/reply
//! correlation, and the HTTP collaborators used by the CLI.

pub mod api;
pub mod chat;
pub mod config;
pub mod connection;
pub mod init;
pub mod protocol;
