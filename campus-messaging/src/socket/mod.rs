//! Socket.IO gateway. `handlers` adapts socketioxide callbacks onto a
//! per-connection [`dispatcher::ConnectionActor`].

pub mod dispatcher;
pub mod handlers;
