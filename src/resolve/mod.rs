//! Session resolution: ambient instance/TTY context, active-context files,
//! and session aliases.

pub mod alias;
pub mod context;
pub mod instance;

pub use alias::resolve;
pub use context::{
    ActiveTransaction, InstanceContext, ResolverIndex, TtyContext, clear_active_transaction,
    read_active_transaction, write_active_transaction,
};
pub use instance::{instance_id, tty_key};
