// Application layer - live state synchronization and charting
pub mod chart;
pub mod controller_api;
pub mod live_channel;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
pub mod testing;
