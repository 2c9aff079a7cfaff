pub mod admin;
pub mod config;
pub mod db;
pub mod provisioning;
pub mod queue;
mod request_logging;
pub mod tasks;
pub mod webhook;
pub mod worker;
