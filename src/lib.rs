pub mod config;
pub mod logging;
pub mod relay;
pub mod shutdown;
pub mod supervisor;
pub mod transport;
