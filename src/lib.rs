//! CrewComm real-time server
//!
//! Presence tracking and message routing for the CrewComm collaboration
//! backend. Clients hold a WebSocket open, identify with their username,
//! and exchange direct and team messages; every message is appended to
//! the durable log before any delivery attempt.

pub mod config;
pub mod database;
pub mod presence;
pub mod protocol;
pub mod rooms;
pub mod routing;
pub mod websocket;

/// Process-unique identifier for one open WebSocket.
pub type ConnId = u64;
