mod config_cmd;
mod query_cmd;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use query_cmd::QueryCommand;
pub use sync_cmd::{pull, push, reset, RunCommand, TableArgs};
