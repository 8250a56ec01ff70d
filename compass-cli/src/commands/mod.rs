pub mod events;
pub mod process;
pub mod pull;
