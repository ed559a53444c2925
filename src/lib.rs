#![doc = include_str!("../README.md")]

mod error;

pub mod config;
pub mod framing;
pub mod pus;
pub mod rs;
pub mod spacepacket;
pub mod time;
pub mod timecode;
pub mod uplink;

pub use error::{Direction, Error, Result};
