pub mod manager;
pub mod signing;

pub use manager::*;
pub use signing::*;
