pub mod actions;
pub mod auth;
pub mod bus;
pub mod classify;
pub mod error;
pub mod feedback;
pub mod gate;
pub mod processor;
pub mod promotion;
pub mod stage;
pub mod storage;
pub mod templates;
#[cfg(test)]
mod testing;

pub use processor::Processor;
