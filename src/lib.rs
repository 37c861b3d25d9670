#![cfg_attr(not(test), no_std)]

pub mod channel_access;
pub mod config;
pub mod events;
pub mod frame;
pub mod radio;
pub mod tasks;
pub mod wake;
