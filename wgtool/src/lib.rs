//! Thin wrapper around the WireGuard userspace tool.
//!
//! Key generation and device configuration are delegated to the external
//! `wg` binary rather than reimplemented. This crate owns the subprocess
//! plumbing, the text configuration format consumed by `wg setconf`, and
//! the kernel-checked interface name type.

mod config;
mod tool;

use libc::c_char;
use std::{borrow::Cow, fmt, str::FromStr};

pub use crate::{config::*, tool::*};

/// The name of a kernel network interface.
///
/// Held as a fixed NUL-padded byte buffer so it can be handed straight to
/// libc and netlink. The kernel limit is [`libc::IFNAMSIZ`] bytes
/// including the terminator, so at most 15 printable bytes.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct InterfaceName([u8; libc::IFNAMSIZ]);

impl FromStr for InterfaceName {
    type Err = InvalidInterfaceName;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let bytes = name.as_bytes();
        match bytes.len() {
            0 => return Err(InvalidInterfaceName::Empty),
            // Room for the trailing NUL must remain.
            len if len >= libc::IFNAMSIZ => return Err(InvalidInterfaceName::TooLong),
            _ => {},
        }

        if bytes
            .iter()
            .any(|b| *b == 0 || *b == b'/' || b.is_ascii_whitespace())
        {
            return Err(InvalidInterfaceName::InvalidChars);
        }

        let mut buf = [0u8; libc::IFNAMSIZ];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }
}

impl InterfaceName {
    /// The name as text, up to the NUL padding.
    pub fn as_str_lossy(&self) -> Cow<'_, str> {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(self.0.len());
        String::from_utf8_lossy(&self.0[..end])
    }

    /// A pointer to the NUL-terminated buffer for FFI calls.
    pub fn as_ptr(&self) -> *const c_char {
        self.0.as_ptr().cast()
    }
}

impl fmt::Debug for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str_lossy())
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str_lossy())
    }
}

/// An interface name was rejected before it could reach the kernel.
#[derive(Debug, PartialEq, Eq)]
pub enum InvalidInterfaceName {
    /// Longer than the kernel's interface name limit.
    TooLong,
    /// An empty string was provided.
    Empty,
    /// Contained a NUL, `/`, or whitespace character.
    InvalidChars,
}

impl fmt::Display for InvalidInterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong => write!(
                f,
                "interface name longer than the system limit of {} bytes",
                libc::IFNAMSIZ - 1
            ),
            Self::Empty => f.write_str("an empty interface name was provided"),
            Self::InvalidChars => {
                f.write_str("interface name contained nul, slash, or space characters")
            },
        }
    }
}

impl std::error::Error for InvalidInterfaceName {}

impl From<InvalidInterfaceName> for std::io::Error {
    fn from(e: InvalidInterfaceName) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        assert_eq!("wg0".parse::<InterfaceName>().unwrap().as_str_lossy(), "wg0");
        assert_eq!(
            "wg-mesh01".parse::<InterfaceName>().unwrap().to_string(),
            "wg-mesh01"
        );
    }

    #[test]
    fn enforces_the_kernel_length_limit() {
        // 15 bytes is the last valid length.
        assert!("abcdefghijklmno".parse::<InterfaceName>().is_ok());
        assert_eq!(
            "abcdefghijklmnop".parse::<InterfaceName>(),
            Err(InvalidInterfaceName::TooLong)
        );
    }

    #[test]
    fn rejects_invalid_characters() {
        for name in ["", "\0", "wg\00", "wg 0", "wg/0"] {
            let parsed = name.parse::<InterfaceName>();
            assert!(parsed.is_err(), "{name:?} should have been rejected");
        }
    }
}
