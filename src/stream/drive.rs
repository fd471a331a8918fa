//! Direction flags for one pass of a socket state machine.

use std::ops::BitOr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Drive(u8);

impl Drive {
    /// Read from the socket before dispatching.
    pub const FILL_RECV_BUFFER: Drive = Drive(0x01);
    /// Flush the send buffer when a send step runs out of space.
    pub const DRAIN_SEND_BUFFER: Drive = Drive(0x02);
    /// Receive-side phases may run.
    pub const ADVANCE_RECV: Drive = Drive(0x04);
    /// Send-side phases may run.
    pub const ADVANCE_SEND: Drive = Drive(0x08);
    /// Push the resulting interest to the multiplexer when done.
    pub const UPDATE_MULTIPLEXER: Drive = Drive(0x10);

    pub const fn empty() -> Self {
        Drive(0)
    }

    pub const fn contains(self, other: Drive) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Drive {
    type Output = Drive;

    fn bitor(self, rhs: Drive) -> Drive {
        Drive(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let drive = Drive::ADVANCE_RECV | Drive::FILL_RECV_BUFFER;
        assert!(drive.contains(Drive::ADVANCE_RECV));
        assert!(!drive.contains(Drive::ADVANCE_SEND));
        assert!(!Drive::empty().contains(Drive::UPDATE_MULTIPLEXER));
    }
}
