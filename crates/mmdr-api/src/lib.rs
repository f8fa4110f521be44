//! HTTP/WebSocket API server for mmdr.
//!
//! Request/response renders go through the handlers in [`handlers`]; the
//! live channel in [`ws`] pushes renders to editors as they type.

pub mod cadence;
pub mod config;
pub mod error;
pub mod handlers;
pub mod headers;
pub mod middleware;
pub mod protocol;
pub mod routes;
pub mod server;
pub mod session;
pub mod state;
pub mod ws;

pub use cadence::{CadencePolicy, Coalescer};
pub use config::{ApiConfig, LiveConfig};
pub use error::ApiError;
pub use protocol::{ClientMessage, RenderCommand, RenderReply, ServerMessage};
pub use routes::create_router;
pub use server::serve;
pub use session::{CloseReason, LiveSession, SessionRegistry, SessionState};
pub use state::AppState;
