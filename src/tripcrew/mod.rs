// src/tripcrew/mod.rs

pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod console;
pub mod error;
pub mod event;
pub mod role;
pub mod scheduler;
pub mod selector;
pub mod session;
pub mod stop_condition;
pub mod transcript;
pub mod transition_policy;
pub mod travel;

// Let's explicitly export SessionDriver so we don't have to access it via tripcrew::session::SessionDriver
// and instead as tripcrew::SessionDriver
pub use session::SessionDriver;
