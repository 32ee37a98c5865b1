//! Application runtime composition modules.

pub(crate) mod exit_handler;
pub(crate) mod progress;
pub(crate) mod settings;
pub(crate) mod terminal;
