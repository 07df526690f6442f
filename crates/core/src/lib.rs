pub mod config;
pub mod connection;
pub mod context;
pub mod execution;
pub mod profiles;
pub mod resolver;
pub mod results;
pub mod services;
pub mod session;
pub mod sql_text;
pub mod tree;
pub mod tree_actions;
pub mod tree_mutation;

#[cfg(test)]
mod test_support;

pub use context::{ContextView, Page, WorkspaceContext};
pub use services::{TransportError, WorkspaceServices};
pub use session::{SessionError, WorkspaceSession};
