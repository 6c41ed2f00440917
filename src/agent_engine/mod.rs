pub mod control;
pub mod detection;
pub mod engine;
pub mod event_bus;
mod farming;
pub mod loop_control;
mod market;
pub mod state;

#[cfg(test)]
pub(crate) mod testkit;
