//! Command Dispatch Module
//!
//! This module maps decoded requests to the handlers an application
//! registered for them.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ RequestParser   │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   Dispatcher    │  (this module)
//! │                 │
//! │  - Uppercase    │
//! │  - Lookup       │
//! │  - Fallback     │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Handler closure │  (application code)
//! │ + ResponseWriter│
//! └─────────────────┘
//! ```

pub mod handler;

pub use handler::{BadRequestHandler, BoxFuture, CommandTable, Dispatcher, Handler, HandlerResult};
