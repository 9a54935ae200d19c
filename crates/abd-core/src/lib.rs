pub mod config;
pub mod logging;

pub mod batch;
pub mod detector;
pub mod link;
pub mod pool;
pub mod probe;
pub mod transfer;
pub mod transport;
pub mod url_model;
