//! Per-option negotiation state, adapted from the Q-method-flavored bitflag
//! table used by libmudtelnet-style clients.

use std::fmt::{Debug, Formatter};

use crate::telnet::command;

/// The full 256-entry option table: one [`Entry`] per possible option code.
#[derive(Clone)]
pub struct Table {
    entries: [Entry; TABLE_SIZE],
}

impl Default for Table {
    fn default() -> Self {
        let mut entries = [Entry::default(); TABLE_SIZE];
        for &opt in LOCALLY_SUPPORTED {
            entries[opt as usize].set_local_support();
        }
        for &opt in REMOTELY_ACCEPTABLE {
            entries[opt as usize].set_remote_support();
        }
        Self { entries }
    }
}

/// Options this client will `WILL`/agree to a `DO` for.
pub const LOCALLY_SUPPORTED: &[u8] = &[
    command::option::BINARY,
    command::option::SGA,
    command::option::TTYPE,
    command::option::NAWS,
    command::option::TSPEED,
    command::option::ENVIRON,
    command::option::LINEMODE,
];

/// Options this client will `DO`/agree to a `WILL` for.
pub const REMOTELY_ACCEPTABLE: &[u8] = &[
    command::option::BINARY,
    command::option::SGA,
    command::option::ECHO,
    command::option::LINEMODE,
];

impl Table {
    #[must_use]
    pub fn entry(&self, opt: u8) -> &Entry {
        &self.entries[opt as usize]
    }

    pub fn entry_mut(&mut self, opt: u8) -> &mut Entry {
        &mut self.entries[opt as usize]
    }

    /// Snapshot the seven flags used for transfer state save/restore.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            binary_local: self.entry(command::option::BINARY).local_enabled(),
            binary_remote: self.entry(command::option::BINARY).remote_enabled(),
            echo_local: self.entry(command::option::ECHO).local_enabled(),
            echo_remote: self.entry(command::option::ECHO).remote_enabled(),
            sga_local: self.entry(command::option::SGA).local_enabled(),
            sga_remote: self.entry(command::option::SGA).remote_enabled(),
            linemode_active: self.entry(command::option::LINEMODE).local_enabled(),
        }
    }
}

/// A snapshot of the seven negotiated flags relevant to transfer bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub binary_local: bool,
    pub binary_remote: bool,
    pub echo_local: bool,
    pub echo_remote: bool,
    pub sga_local: bool,
    pub sga_remote: bool,
    pub linemode_active: bool,
}

#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct Entry(u8);

impl Entry {
    const SUPPORT_LOCAL: u8 = 1;
    const SUPPORT_REMOTE: u8 = 1 << 1;
    const LOCAL_STATE: u8 = 1 << 2;
    const REMOTE_STATE: u8 = 1 << 3;
    /// We've already sent a `WONT` declining a `DO` for an unsupported option.
    const LOCAL_DECLINED: u8 = 1 << 4;
    /// We've already sent a `DONT` declining a `WILL` for an unacceptable option.
    const REMOTE_DECLINED: u8 = 1 << 5;

    #[must_use]
    pub fn local_support(self) -> bool {
        self.0 & Self::SUPPORT_LOCAL != 0
    }

    pub fn set_local_support(&mut self) {
        self.0 |= Self::SUPPORT_LOCAL;
    }

    #[must_use]
    pub fn remote_support(self) -> bool {
        self.0 & Self::SUPPORT_REMOTE != 0
    }

    pub fn set_remote_support(&mut self) {
        self.0 |= Self::SUPPORT_REMOTE;
    }

    #[must_use]
    pub fn local_enabled(self) -> bool {
        self.0 & Self::LOCAL_STATE != 0
    }

    pub fn set_local_enabled(&mut self, enabled: bool) {
        if enabled {
            self.0 |= Self::LOCAL_STATE;
        } else {
            self.0 &= !Self::LOCAL_STATE;
        }
    }

    #[must_use]
    pub fn remote_enabled(self) -> bool {
        self.0 & Self::REMOTE_STATE != 0
    }

    pub fn set_remote_enabled(&mut self, enabled: bool) {
        if enabled {
            self.0 |= Self::REMOTE_STATE;
        } else {
            self.0 &= !Self::REMOTE_STATE;
        }
    }

    #[must_use]
    pub fn local_declined(self) -> bool {
        self.0 & Self::LOCAL_DECLINED != 0
    }

    pub fn set_local_declined(&mut self) {
        self.0 |= Self::LOCAL_DECLINED;
    }

    #[must_use]
    pub fn remote_declined(self) -> bool {
        self.0 & Self::REMOTE_DECLINED != 0
    }

    pub fn set_remote_declined(&mut self) {
        self.0 |= Self::REMOTE_DECLINED;
    }
}

impl Debug for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Entry")
            .field("local_support", &self.local_support())
            .field("local_enabled", &self.local_enabled())
            .field("remote_support", &self.remote_support())
            .field("remote_enabled", &self.remote_enabled())
            .finish()
    }
}

const TABLE_SIZE: usize = 1 + u8::MAX as usize;

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_set_support_not_enabled() {
        let table = Table::default();
        let binary = table.entry(command::option::BINARY);
        assert!(binary.local_support());
        assert!(binary.remote_support());
        assert!(!binary.local_enabled());
        assert!(!binary.remote_enabled());

        let echo = table.entry(command::option::ECHO);
        assert!(!echo.local_support());
        assert!(echo.remote_support());
    }

    #[test]
    fn snapshot_reads_seven_flags() {
        let mut table = Table::default();
        table
            .entry_mut(command::option::BINARY)
            .set_local_enabled(true);
        let snap = table.snapshot();
        assert_eq!(
            snap,
            Snapshot {
                binary_local: true,
                ..Snapshot::default()
            }
        );
    }
}
