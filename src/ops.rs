use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Interest and readiness bits for a registered channel.
///
/// The readiness backend only distinguishes read and write readiness;
/// ACCEPT and CONNECT exist at this layer because a listening socket's
/// read readiness means "a connection is waiting" and a connecting
/// socket's write readiness means "the handshake finished".
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ops(u8);

impl Ops {
    pub const ACCEPT: Ops = Ops(0b0001);
    pub const CONNECT: Ops = Ops(0b0010);
    pub const READ: Ops = Ops(0b0100);
    pub const WRITE: Ops = Ops(0b1000);

    pub const fn empty() -> Ops {
        Ops(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`.
    pub const fn contains(self, other: Ops) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when at least one bit of `other` is set in `self`.
    pub const fn intersects(self, other: Ops) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn with(self, other: Ops) -> Ops {
        Ops(self.0 | other.0)
    }

    pub const fn without(self, other: Ops) -> Ops {
        Ops(self.0 & !other.0)
    }

    pub(crate) const fn bits(self) -> u8 {
        self.0
    }

    pub(crate) const fn from_bits(bits: u8) -> Ops {
        Ops(bits & 0b1111)
    }
}

impl BitOr for Ops {
    type Output = Ops;

    fn bitor(self, rhs: Ops) -> Ops {
        self.with(rhs)
    }
}

impl BitOrAssign for Ops {
    fn bitor_assign(&mut self, rhs: Ops) {
        *self = self.with(rhs);
    }
}

impl fmt::Debug for Ops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(empty)");
        }
        let mut sep = "";
        for (bit, name) in [
            (Ops::ACCEPT, "ACCEPT"),
            (Ops::CONNECT, "CONNECT"),
            (Ops::READ, "READ"),
            (Ops::WRITE, "WRITE"),
        ] {
            if self.contains(bit) {
                write!(f, "{sep}{name}")?;
                sep = "|";
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Ops;

    #[test]
    fn bit_arithmetic() {
        let ops = Ops::READ | Ops::WRITE;
        assert!(ops.contains(Ops::READ));
        assert!(ops.contains(Ops::WRITE));
        assert!(!ops.contains(Ops::ACCEPT));
        assert!(ops.intersects(Ops::WRITE | Ops::CONNECT));
        assert!(!ops.intersects(Ops::ACCEPT | Ops::CONNECT));

        let ops = ops.without(Ops::WRITE);
        assert_eq!(ops, Ops::READ);
        assert!(ops.without(Ops::READ).is_empty());
    }

    #[test]
    fn debug_lists_set_bits() {
        assert_eq!(format!("{:?}", Ops::empty()), "(empty)");
        assert_eq!(format!("{:?}", Ops::READ | Ops::WRITE), "READ|WRITE");
    }
}
