//! relaymark library
//!
//! Watches a channel for start links to a delivery agent, collects the media
//! the agent sends back, watermarks and republishes it, then negotiates a
//! shareable link with a link-issuing agent and writes it into the original
//! post's caption.
//!
//! The chat transport is supplied by the embedding application through
//! [`transport::Transport`]; [`session::SessionCoordinator`] drives the rest.

pub mod cli;
pub mod config;
pub mod logging;
pub mod media;
pub mod negotiate;
pub mod publish;
pub mod session;
pub mod transport;
