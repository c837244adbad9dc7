mod connector;
mod execution;
mod playbook;
mod trigger;

pub use connector::{Connector, ConnectorConfiguration, ConnectorType};
pub use execution::{
    ExecutionLogEntry, ExecutionRecord, ExecutionResults, ExecutionStatus, ExecutionUpdate,
    LogLevel, NewExecution,
};
pub use playbook::*;
pub use trigger::{RunRequest, TriggerSource};
