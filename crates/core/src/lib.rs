pub mod config;
pub mod error;
pub mod logging;
pub mod value;

pub use config::FlowConfig;
pub use error::*;
pub use value::*;
