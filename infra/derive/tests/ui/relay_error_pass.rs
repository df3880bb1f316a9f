use relay_derive::relay_error;
use std::borrow::Cow;

#[relay_error]
pub enum DemoError {
    #[error("IO error{}: {source}", format_context(.context))]
    Io {
        #[source]
        source: std::io::Error,
        context: Option<Cow<'static, str>>,
    },

    #[error("Internal error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

fn read() -> Result<String, DemoError> {
    std::fs::read_to_string("missing.toml").context("Reading settings")
}

fn main() {
    let err = read().unwrap_err();
    assert!(matches!(err, DemoError::Io { context: Some(_), .. }));

    let internal: DemoError = "boom".into();
    assert_eq!(internal.to_string(), "Internal error: boom");

    let with_context: Result<(), DemoError> = Err(DemoError::from("boom"));
    let err = with_context.context("startup").unwrap_err();
    assert_eq!(err.to_string(), "Internal error (startup): boom");
}
