#![allow(clippy::uninlined_format_args)]

pub mod capture;
pub mod config;
pub mod convert;
pub mod error;
pub mod flow;
pub mod output;
pub mod recording;
pub mod replay;
pub mod tls;
