pub mod executions;
pub mod playbooks;
pub mod run;

pub use executions::cmd_executions;
pub use playbooks::{cmd_import, cmd_validate};
pub use run::{cmd_run, RunArgs};
