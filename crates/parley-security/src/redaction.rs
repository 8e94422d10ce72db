//! Log output filter for provider keys and Parley access tokens.
//!
//! Upstream error bodies and request traces can echo credentials back; every
//! formatted log line passes through [`redact_secrets`] before it is written.

use std::io::{self, Write};
use std::sync::LazyLock;

use regex::Regex;
use tracing_subscriber::fmt::MakeWriter;

static SECRET_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
          sk-ant-api\S{10,}                 # Anthropic keys
        | sk-\S{20,}                        # OpenAI keys
        | pk_[A-Za-z0-9_\-]{20,}            # gateway bearer tokens
        | Bearer\s+[A-Za-z0-9_\-\.]{20,}    # Authorization header values
        ",
    )
    .expect("secret patterns are valid")
});

/// Mask provider keys and gateway tokens with `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    SECRET_PATTERNS.replace_all(input, "[REDACTED]").into_owned()
}

/// `MakeWriter` that wraps another one and scrubs each log line it emits.
pub struct RedactingWriter<M> {
    make_inner: M,
}

impl<M> RedactingWriter<M> {
    pub fn new(make_inner: M) -> Self {
        Self { make_inner }
    }
}

impl RedactingWriter<fn() -> io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr)
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for RedactingWriter<M> {
    type Writer = Redacted<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Redacted {
            inner: self.make_inner.make_writer(),
        }
    }
}

pub struct Redacted<W> {
    inner: W,
}

impl<W: Write> Write for Redacted<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let line = String::from_utf8_lossy(buf);
        self.inner.write_all(redact_secrets(&line).as_bytes())?;
        // Report the caller's length; the redacted text may be shorter.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
