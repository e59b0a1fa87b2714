pub mod console;
pub mod creds;
pub mod dispatcher;
pub mod orchestrator;
pub mod port_alloc;
pub mod properties;
pub mod provision;
pub mod repository;
pub mod runtime;
pub mod settings;
pub mod status;
