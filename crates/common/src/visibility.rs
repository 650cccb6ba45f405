use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Who can read a stored file.
///
/// Fixed at upload time; a file never changes visibility afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Stored as plaintext, readable by anyone holding the reference
    Public,
    /// Encrypted with a random key that never leaves this device's keyring
    Private,
    /// Encrypted with a key derived from a password the owner can share
    Password,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Password => "password",
        }
    }

    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Visibility::Public)
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown visibility: {0}")]
pub struct ParseVisibilityError(String);

impl FromStr for Visibility {
    type Err = ParseVisibilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" | "open" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            "password" => Ok(Visibility::Password),
            other => Err(ParseVisibilityError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for visibility in [Visibility::Public, Visibility::Private, Visibility::Password] {
            assert_eq!(visibility.as_str().parse::<Visibility>().unwrap(), visibility);
        }
        assert_eq!("open".parse::<Visibility>().unwrap(), Visibility::Public);
        assert!("secret".parse::<Visibility>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase() {
        let json = serde_json::to_string(&Visibility::Private).unwrap();
        assert_eq!(json, "\"private\"");
    }
}
