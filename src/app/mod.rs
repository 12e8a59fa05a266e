pub(crate) mod config_manager;
pub(crate) mod ipc;
pub(crate) mod progress_manager;
pub(crate) mod runtime;
