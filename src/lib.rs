//! Callwire Dispatch Core
//!
//! A line-oriented JSON command dispatch server: remote controllers
//! connect over TCP, send one JSON request per line and receive one
//! JSON response per line, in order. Host capabilities are grouped
//! into handler classes that declare typed operations up front and are
//! constructed lazily, at most once, on the first call that needs
//! them.
//!
//! The crate splits along the request's path through the system:
//!
//! - [`registry`]: handler classes, the name -> operation map and the
//!   single-instance lifecycle
//! - [`descriptor`]: operation and parameter declarations
//! - [`bind`]: wire arguments -> typed argument list
//! - [`invoke`]: execution and failure classification
//! - [`server`]: the TCP accept loop and per-connection workers

pub mod bind;
pub mod descriptor;
pub mod invoke;
pub mod registry;
pub mod server;

pub use bind::{bind, BindError, BoundArgs};
pub use descriptor::{Operation, OperationDescriptor, OperationResult, ParamSpec, ParamType};
pub use invoke::{invoke, InvokeOutcome};
pub use registry::{ConfigError, Handler, HandlerClass, HandlerFactory, HandlerRegistry};
pub use server::{DispatchServer, ServerConfig};
