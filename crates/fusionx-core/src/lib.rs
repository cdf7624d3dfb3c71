pub mod config;
pub mod constants;
pub mod error;
pub mod order;
pub mod types;

pub use config::*;
pub use constants::*;
pub use error::{ErrorClass, SwapError};
pub use order::*;
pub use types::*;
