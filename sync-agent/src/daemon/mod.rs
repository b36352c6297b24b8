//! Process lifecycle helpers for the agent binary.

pub mod shutdown;
