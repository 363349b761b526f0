//! Admin chat channel CLI.
//!
//! Thin front end over `chatwire-client`: it builds a credential provider
//! from the flags/environment, opens the resilient channel, and either
//! streams inbound frames to stdout (`tail`) or pushes one outbound frame
//! (`send`, `typing`).

pub mod cli;
pub mod commands;
pub mod logging;
