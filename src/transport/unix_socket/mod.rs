//! Unix domain socket transport layer

pub mod handler;
pub mod server;
pub mod session;

pub use {
    handler::RequestHandler,
    server::UnixSocketServer,
    session::{SessionReader, UnixSocketSession},
};
