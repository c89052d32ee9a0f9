//! Short-lived push credentials.

use std::fmt;

/// A token used for exactly one push.
///
/// The bytes are overwritten with zeros by [`invalidate`](Self::invalidate)
/// and again on drop, so a copy never outlives the push step.
pub struct PushCredentials {
  token: Vec<u8>,
  valid: bool,
}

impl PushCredentials {
  pub fn new(token: impl Into<String>) -> Self {
    let token = token.into().into_bytes();
    let valid = !token.is_empty();
    Self { token, valid }
  }

  /// Read the token from an environment variable.
  pub fn from_env(var: &str) -> Option<Self> {
    std::env::var(var).ok().filter(|t| !t.is_empty()).map(Self::new)
  }

  /// The token, unless it has been invalidated.
  pub fn secret(&self) -> Option<&str> {
    if !self.valid {
      return None;
    }
    std::str::from_utf8(&self.token).ok()
  }

  pub fn is_valid(&self) -> bool {
    self.valid
  }

  /// Zero the token. Safe to call more than once.
  pub fn invalidate(&mut self) {
    for byte in self.token.iter_mut() {
      // SAFETY: `byte` is a valid, aligned, exclusive reference into our own buffer.
      unsafe { std::ptr::write_volatile(byte, 0) };
    }
    std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
    self.valid = false;
  }

  #[cfg(test)]
  pub(crate) fn raw_bytes(&self) -> &[u8] {
    &self.token
  }
}

impl Drop for PushCredentials {
  fn drop(&mut self) {
    self.invalidate();
  }
}

impl fmt::Debug for PushCredentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PushCredentials")
      .field("token", &"<redacted>")
      .field("valid", &self.valid)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  fn invalidate_zeroes_token() {
    let mut creds = PushCredentials::new("ghp_secret");
    assert_eq!(creds.secret(), Some("ghp_secret"));

    creds.invalidate();

    assert_eq!(creds.secret(), None);
    assert!(creds.raw_bytes().iter().all(|b| *b == 0));
    creds.invalidate();
    assert!(!creds.is_valid());
  }

  #[test]
  fn debug_never_shows_token() {
    let creds = PushCredentials::new("ghp_secret");
    assert!(!format!("{:?}", creds).contains("ghp_secret"));
  }

  #[test]
  fn empty_token_is_invalid() {
    assert!(!PushCredentials::new("").is_valid());
  }

  #[test]
  #[serial]
  fn reads_from_env() {
    temp_env::with_var("BINFORGE_TEST_TOKEN", Some("abc"), || {
      let creds = PushCredentials::from_env("BINFORGE_TEST_TOKEN").unwrap();
      assert_eq!(creds.secret(), Some("abc"));
    });
    temp_env::with_var("BINFORGE_TEST_TOKEN", None::<&str>, || {
      assert!(PushCredentials::from_env("BINFORGE_TEST_TOKEN").is_none());
    });
  }
}
