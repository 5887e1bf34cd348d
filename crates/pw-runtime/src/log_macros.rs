/// Domain-aware logging macros.
///
/// Each macro injects a `domain` field automatically so callers never need
/// to remember the string literal. Domains: `sys` (lifecycle and signals),
/// `pipe` (FIFO setup and byte pumping), `conn` (remote streams), `proc`
/// (the child process).
///
/// ```ignore
/// pw_info!(sys, signal = "SIGINT", "received signal");
/// pw_debug!(pipe, path = %path.display(), "pumping target");
/// ```

/// Internal helper. Do not call directly; use `pw_error!` … `pw_trace!`.
#[doc(hidden)]
macro_rules! pw_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

/// Log at ERROR level with an automatic `domain` field.
#[allow(unused_macros)]
macro_rules! pw_error {
    ($domain:ident, $($rest:tt)*) => {
        pw_log!(error, $domain, $($rest)*)
    };
}

/// Log at WARN level with an automatic `domain` field.
macro_rules! pw_warn {
    ($domain:ident, $($rest:tt)*) => {
        pw_log!(warn, $domain, $($rest)*)
    };
}

/// Log at INFO level with an automatic `domain` field.
macro_rules! pw_info {
    ($domain:ident, $($rest:tt)*) => {
        pw_log!(info, $domain, $($rest)*)
    };
}

/// Log at DEBUG level with an automatic `domain` field.
macro_rules! pw_debug {
    ($domain:ident, $($rest:tt)*) => {
        pw_log!(debug, $domain, $($rest)*)
    };
}

/// Log at TRACE level with an automatic `domain` field.
#[allow(unused_macros)]
macro_rules! pw_trace {
    ($domain:ident, $($rest:tt)*) => {
        pw_log!(trace, $domain, $($rest)*)
    };
}
