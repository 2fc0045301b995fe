pub mod errors;
pub mod tick;

pub use errors::Error;
pub use tick::poll_and_fire;
