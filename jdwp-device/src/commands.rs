// JDWP command identifiers
//
// Command Sets handled by the fake device:
// 1    = VirtualMachine
// 0xc7 = DDMS (Android extension, one command carrying chunks)

use std::fmt;

// Command set IDs
pub mod command_sets {
    pub const VIRTUAL_MACHINE: u8 = 1;
    pub const DDMS: u8 = 0xc7;
}

// VirtualMachine commands (set 1)
pub mod vm_commands {
    pub const VERSION: u8 = 1;
    pub const ID_SIZES: u8 = 7;
    pub const SUSPEND: u8 = 8;
    pub const RESUME: u8 = 9;
    pub const EXIT: u8 = 10;
}

// DDMS commands (set 0xc7)
pub mod ddms_commands {
    pub const CHUNK: u8 = 0x01;
}

// JDWP error codes sent back by the fake VM
pub mod error_codes {
    pub const NOT_IMPLEMENTED: i16 = 99;
}

/// `(command set, command)` pair used as a dispatch key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JdwpCommandId {
    pub command_set: u8,
    pub command: u8,
}

impl JdwpCommandId {
    pub const VM_VERSION: Self = Self::new(command_sets::VIRTUAL_MACHINE, vm_commands::VERSION);
    pub const VM_ID_SIZES: Self = Self::new(command_sets::VIRTUAL_MACHINE, vm_commands::ID_SIZES);
    pub const VM_SUSPEND: Self = Self::new(command_sets::VIRTUAL_MACHINE, vm_commands::SUSPEND);
    pub const VM_RESUME: Self = Self::new(command_sets::VIRTUAL_MACHINE, vm_commands::RESUME);
    pub const VM_EXIT: Self = Self::new(command_sets::VIRTUAL_MACHINE, vm_commands::EXIT);
    pub const DDMS_CHUNK: Self = Self::new(command_sets::DDMS, ddms_commands::CHUNK);

    pub const fn new(command_set: u8, command: u8) -> Self {
        Self {
            command_set,
            command,
        }
    }
}

impl fmt::Display for JdwpCommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:#04x}, {:#04x})", self.command_set, self.command)
    }
}
