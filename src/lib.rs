pub mod api;
pub mod cli;
pub mod error;
pub mod membership;
pub mod node;
pub mod resolver;
pub mod settings;
pub mod transport;
pub mod vtable;
