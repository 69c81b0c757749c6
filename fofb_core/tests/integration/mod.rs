mod common;

mod config_loading;
mod correction_accuracy;
mod fault_paths;
mod lifecycle;
mod read_only;
mod ring_handshake;
mod runner;
