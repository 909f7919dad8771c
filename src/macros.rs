// src/macros.rs

//
// Logging macros
//
// logging feature enabled → tracing
// logging feature disabled → only log_error prints to stderr
//
// Call sites pass plain format arguments so the same line works in both
// configurations; variables referenced only by a macro are prefixed with `_`.
//

#![allow(unused_macros)]

// --------------------
// ERROR
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "krpc", $($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_error {
    ($($arg:tt)*) => {
        eprintln!("krpc: {}", format_args!($($arg)*))
    };
}

// --------------------
// WARN
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "krpc", $($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_warn {
    ($($arg:tt)*) => {};
}

// --------------------
// DEBUG
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "krpc", $($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {};
}

// --------------------
// TRACE
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "krpc", $($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_trace {
    ($($arg:tt)*) => {};
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_trace;
pub(crate) use log_warn;
