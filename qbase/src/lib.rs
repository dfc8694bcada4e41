pub mod epoch;
pub mod error;
pub mod frame;
pub mod packet;

pub use epoch::Epoch;
