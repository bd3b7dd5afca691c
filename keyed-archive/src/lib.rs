#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod archive;
pub mod bplist;
pub mod error;
pub mod util;
