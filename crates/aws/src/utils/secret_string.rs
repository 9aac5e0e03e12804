//! Zeroizing holder for secret keys and session tokens

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

const REDACTED: &str = "[REDACTED]";

/// Credential material wiped from memory on drop
///
/// Formatting never prints the value; it is only readable inside
/// [`expose_secret`](SecretString::expose_secret), so access keys and
/// session tokens may travel inside structs that are logged with `?`.
///
/// ```
/// use nebula_aws::SecretString;
///
/// let key = SecretString::new("wJalrXUtnFEMI");
/// assert_eq!(key.expose_secret(str::len), 13);
/// assert_eq!(format!("{key:?}"), "SecretString([REDACTED])");
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the value for the duration of `f`
    pub fn expose_secret<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        f(&self.0)
    }

    /// Whether the provider returned an empty value
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretString").field(&format_args!("{REDACTED}")).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_value() {
        let token = SecretString::new("FwoGZXIvYXdzEJr");
        let rendered = format!("{:?}", Some(&token));
        assert!(!rendered.contains("FwoGZ"));
        assert!(rendered.contains(REDACTED));
    }

    #[test]
    fn test_expose_and_clone() {
        let key = SecretString::from(String::from("abc"));
        let copy = key.clone();
        drop(key);
        assert_eq!(copy.expose_secret(str::to_owned), "abc");
        assert!(!copy.is_empty());
        assert!(SecretString::new("").is_empty());
    }
}
