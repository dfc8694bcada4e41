pub mod error;
pub mod keys;
pub mod signal;

pub use error::KeyError;
pub use signal::KeyPhaseBit;
