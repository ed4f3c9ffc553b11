#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
pub mod klog;

pub mod config;
pub mod error;
pub mod hal;
pub mod kernel;
pub mod drivers;
pub mod system;
