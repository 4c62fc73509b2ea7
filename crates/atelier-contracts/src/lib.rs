pub mod apps;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod memory;
pub mod prompt;
pub mod reference;
pub mod runs;

pub use error::{AtelierError, AtelierResult};
