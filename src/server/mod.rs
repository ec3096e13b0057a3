//! Serving HTTP over TCP: the accept loop and the path router.

pub mod listener;
pub mod router;

pub use listener::Server;
pub use router::{RouteError, Router};
