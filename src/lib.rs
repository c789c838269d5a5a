#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod artifacts;
pub mod classifier;
pub mod config;
pub mod error;
pub mod explain;
pub mod features;
pub mod linalg;
pub mod record;
pub mod scaler;
pub mod server;
pub mod service;
