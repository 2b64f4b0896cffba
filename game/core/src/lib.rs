//! Gameplay glue between the network core and the simulation (section 1's "external
//! collaborator"): demo component vocabulary, config, and `InputHandler` wiring the
//! `gamerunner` binary registers with `servercore::ServerCore`.

pub mod components;
pub mod config;
pub mod handlers;
