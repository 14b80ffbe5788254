// Error taxonomy shared by every subsystem
//
// Callers branch on the kind to decide between retrying, reconnecting
// and terminating the owning session.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// I/O timeout, device removed, short read. Recoverable.
    Transport,
    /// Malformed reply. The value is unavailable for this tick.
    Protocol,
    /// Programming or invariant fault. Never retried.
    Logic,
    /// Peripheral absent or bad configuration at startup.
    Config,
}

impl ErrorKind {
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorKind::Transport | ErrorKind::Protocol)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Logic => "logic",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_link_errors_are_recoverable() {
        assert!(ErrorKind::Transport.is_recoverable());
        assert!(ErrorKind::Protocol.is_recoverable());
        assert!(!ErrorKind::Logic.is_recoverable());
        assert!(!ErrorKind::Config.is_recoverable());
        assert_eq!(ErrorKind::Transport.to_string(), "transport");
    }
}
