//! Front-door JSON-RPC listener.
//!
//! One HTTP listener serves every chain. Requests are routed by the first
//! path segment to the handler the chain registered for its current run:
//!
//! - `GET /health` - Liveness probe
//! - `GET /chains` - Chains with a registered handler
//! - `POST /{chain_id}` (or `/{chain_id}/`) - JSON-RPC request for that chain
//!
//! Unknown chains answer 404. A chain whose virtual node is not running, or
//! a router that has been closed, answers 503.

mod handlers;
mod router;
mod routes;
mod server;

pub use router::{RouterError, RpcRouter};
pub use routes::create_router;
pub use server::{HttpServer, HttpServerError, ServeExit};
