//! Command Dispatch
//!
//! Handlers are plain closures that take the decoded [`Request`] and the
//! connection's [`ResponseWriter`] and return a boxed future:
//!
//! ```ignore
//! builder.handle("ping", |_req, w| Box::pin(async move {
//!     w.write_string("PONG").await?;
//!     Ok(())
//! }));
//! ```
//!
//! The [`CommandTable`] keys handlers by uppercased name. The
//! [`Dispatcher`] is what the connection loop calls for every request:
//! either a table lookup with an "unknown command" fallback, or a single
//! custom function that sees every request.

use crate::connection::ConnectionError;
use crate::protocol::{Request, ResponseWriter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

pub use futures_util::future::BoxFuture;

/// What a handler resolves to. An `Err` closes the connection.
pub type HandlerResult = anyhow::Result<()>;

/// A registered command handler.
pub type Handler = Arc<
    dyn for<'a> Fn(Request, &'a mut ResponseWriter) -> BoxFuture<'a, HandlerResult> + Send + Sync,
>;

/// Called once when a connection fails to produce a request, before it is
/// closed. May write a diagnostic response.
pub type BadRequestHandler = Arc<
    dyn for<'a> Fn(&'a ConnectionError, &'a mut ResponseWriter) -> BoxFuture<'a, ()> + Send + Sync,
>;

/// Handlers keyed by uppercased command name.
#[derive(Clone, Default)]
pub struct CommandTable {
    handlers: HashMap<String, Handler>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous handler
    /// for the same name in any case.
    pub fn insert(&mut self, name: &str, handler: Handler) -> Option<Handler> {
        self.handlers.insert(name.to_uppercase(), handler)
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&Handler> {
        self.handlers.get(&name.to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered names, uppercased, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// The per-request entry point of a server.
#[derive(Clone)]
pub enum Dispatcher {
    /// Look the command up in a frozen table.
    Table(Arc<CommandTable>),

    /// Hand every request to one function.
    Custom(Handler),
}

impl Dispatcher {
    /// Runs the handler for `request`.
    ///
    /// An unregistered command is answered with
    /// ``-ERR unknown command `<name>` `` and is not an error for the
    /// connection.
    pub async fn dispatch(&self, request: Request, writer: &mut ResponseWriter) -> HandlerResult {
        match self {
            Dispatcher::Custom(handler) => handler(request, writer).await,
            Dispatcher::Table(table) => match table.get(&request.command) {
                Some(handler) => {
                    trace!(command = %request.command, "Dispatching");
                    handler(request, writer).await
                }
                None => {
                    trace!(command = %request.command, "Unknown command");
                    writer
                        .write_error(format!("ERR unknown command `{}`", request.command))
                        .await?;
                    Ok(())
                }
            },
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatcher::Table(table) => f.debug_tuple("Table").field(table).finish(),
            Dispatcher::Custom(_) => f.write_str("Custom"),
        }
    }
}
