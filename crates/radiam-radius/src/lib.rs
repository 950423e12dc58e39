// RADIUS client socket multiplexer
pub mod client;

// Per-destination identifier pools
pub mod id_manager;

// RADIUS server socket
pub mod server;

pub use client::RadiusClientSocket;
pub use id_manager::IdentifierManager;
pub use server::{RadiusClientEntry, RadiusHandler, RadiusServerSocket};
