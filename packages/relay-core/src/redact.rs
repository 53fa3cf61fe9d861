//! Secret redaction for logs and serialized output.
//!
//! [`Redacted`] formats and serializes as `"<redacted>"` whatever it wraps, so a
//! private key can sit inside a config struct that is logged with `{:?}`.

use std::fmt::{self, Debug, Display};

/// Wrapper that hides its inner value from `Debug`, `Display` and `Serialize`
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Redacted<T>(pub T);

impl<T> Redacted<T> {
    /// Access the secret; call sites are the only places it leaves the wrapper
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> serde::Serialize for Redacted<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        "<redacted>".serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_output() {
        let key = Redacted("0xdeadbeef".to_string());
        assert_eq!(format!("{:?}", key), "<redacted>");
        assert_eq!(key.to_string(), "<redacted>");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"<redacted>\"");
        assert_eq!(key.expose(), "0xdeadbeef");
    }
}
