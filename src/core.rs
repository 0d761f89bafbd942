pub mod decompression;
pub mod deployment;
pub mod linker;
pub mod mod_manager;
pub mod orchestrator;
pub mod ports;
pub mod registry;
pub mod transfer;
pub mod ue4ss;
