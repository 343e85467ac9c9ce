use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Policies a [`Daemon`](crate::Daemon) applies around a denied hit.
///
/// Flags combine with `|` and are fixed once handed to a daemon.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// On denial, sleep a random short interval and hit once more.
    pub const RETRYABLE: Flags = Flags(1 << 0);
    /// Grant the single denial that follows a hit draining the bucket.
    pub const FORGIVING: Flags = Flags(1 << 1);

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut names = Vec::with_capacity(2);
        if self.contains(Flags::RETRYABLE) {
            names.push("RETRYABLE");
        }
        if self.contains(Flags::FORGIVING) {
            names.push("FORGIVING");
        }
        f.write_str(&names.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_contains_nothing() {
        assert!(!Flags::NONE.contains(Flags::RETRYABLE));
        assert!(!Flags::NONE.contains(Flags::FORGIVING));
        assert!(!Flags::NONE.contains(Flags::NONE));
    }

    #[test]
    fn combined_flags_are_independent() {
        let both = Flags::RETRYABLE | Flags::FORGIVING;
        assert!(both.contains(Flags::RETRYABLE));
        assert!(both.contains(Flags::FORGIVING));
        assert!(!Flags::RETRYABLE.contains(Flags::FORGIVING));
        assert_eq!(format!("{both:?}"), "RETRYABLE | FORGIVING");
    }
}
