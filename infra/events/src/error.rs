use std::borrow::Cow;

/// Errors surfaced synchronously by the event service.
///
/// Subscriber and veto faults never show up here; they are isolated per
/// publication and reported through logs and telemetry events instead.
#[relay_derive::relay_error]
pub enum EventBusError {
    /// A subscription key or publication target is unusable (e.g. an empty topic).
    #[error("Invalid key{}: {message}", format_context(.context))]
    InvalidKey { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A topic pattern failed to compile.
    #[error("Invalid topic pattern{}: {source}", format_context(.context))]
    InvalidPattern { source: regex::Error, context: Option<Cow<'static, str>> },

    /// The locator already holds a service under this name.
    #[error("Name already bound{}: {message}", format_context(.context))]
    AlreadyBound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The locator has no service under this name.
    #[error("Service not found{}: {message}", format_context(.context))]
    NotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The service was shut down and no longer accepts publications.
    #[error("Service stopped{}: {message}", format_context(.context))]
    ServiceStopped { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The confined dispatch thread could not be spawned.
    #[error("Dispatch thread error{}: {source}", format_context(.context))]
    Spawn { source: std::io::Error, context: Option<Cow<'static, str>> },

    /// Configuration could not be loaded or deserialized.
    #[error("Config error{}: {source}", format_context(.context))]
    Config { source: config::ConfigError, context: Option<Cow<'static, str>> },

    /// Internal invariant violation.
    #[error("Internal event bus error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}
