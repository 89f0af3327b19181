//! Breakpoint table (C3, §4.3).
//!
//! Addressed by a fixed 256-bucket open hash with chaining rather than the
//! `BTreeMap` a ptrace-based debugger can afford: this table is consulted
//! from the signal handler, where an allocation-heavy rebalancing structure
//! is not something we want on the hot path. Each bucket is a small `Vec`
//! (collisions are rare: addresses are sparse over the full 64-bit space)
//! so a miss is O(1) and a hit is a short linear scan.

use crate::errors::RtError;
use crate::memory;

/// x86 and x86_64 share the single-byte `int3` trap instruction.
pub const TRAP_INSTRUCTION: u8 = 0xcc;

const NUM_BUCKETS: usize = 256;

fn bucket_of(addr: u64) -> usize {
    (addr as usize).wrapping_mul(2654435761) % NUM_BUCKETS
}

/// The role a breakpoint plays, used by the signal dispatcher (§4.6) to
/// decide what happens on a hit without re-deriving intent from surrounding
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    /// Set by the debugger via `create_breakpoint`.
    User,
    /// One-shot, placed one instruction past a just-hit user breakpoint so
    /// `continue` can step over it without ever clearing `in_memory`.
    ContinueAux,
    /// One-shot, placed at the control-flow successor of the current PC
    /// while single-step mode is enabled.
    SingleStepAux,
    /// Placed by the runtime itself at the process exit entry point,
    /// thread-create, or thread-death hook.
    EventInternal,
    /// Owned by one thread; other threads that hit it continue silently.
    ThreadSpecific { owner_tid: u64 },
}

#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub address: u64,
    pub kind: BreakpointKind,
    /// Original instruction byte(s) that `TRAP_INSTRUCTION` replaced.
    pub saved_bytes: [u8; 1],
    /// `true` iff the trap byte is the one currently at `address` in memory.
    /// A breakpoint is always in exactly one of the two states described in
    /// the struct-level invariant below; never both, never neither.
    pub in_memory: bool,
}

impl Breakpoint {
    fn new(address: u64, kind: BreakpointKind) -> Breakpoint {
        Breakpoint {
            address,
            kind,
            saved_bytes: [0],
            in_memory: false,
        }
    }
}

/// Address-keyed breakpoint store. One instance lives in the process-global
/// singleton state and is protected by the same lock that serializes access
/// to the rest of it (§9).
pub struct BreakpointTable {
    buckets: Vec<Vec<Breakpoint>>,
}

impl BreakpointTable {
    pub fn new() -> BreakpointTable {
        BreakpointTable {
            buckets: (0..NUM_BUCKETS).map(|_| Vec::new()).collect(),
        }
    }

    fn find_mut(&mut self, addr: u64) -> Option<&mut Breakpoint> {
        self.buckets[bucket_of(addr)]
            .iter_mut()
            .find(|b| b.address == addr)
    }

    pub fn find(&self, addr: u64) -> Option<&Breakpoint> {
        self.buckets[bucket_of(addr)].iter().find(|b| b.address == addr)
    }

    /// Create a breakpoint at `addr`. If one already exists there,
    /// returns the existing entry unchanged (§4.3: "double-create is
    /// coalesced, not an error"; §8 scenario 7).
    pub fn create(&mut self, addr: u64, kind: BreakpointKind) -> &Breakpoint {
        let bucket = &mut self.buckets[bucket_of(addr)];
        if let Some(i) = bucket.iter().position(|b| b.address == addr) {
            return &bucket[i];
        }
        bucket.push(Breakpoint::new(addr, kind));
        bucket.last().unwrap()
    }

    /// Patch the trap instruction into memory, saving the original byte.
    /// No-op (returns `Ok`) if already installed.
    pub fn install(&mut self, addr: u64) -> Result<(), RtError> {
        let bp = self
            .find_mut(addr)
            .ok_or_else(|| RtError::Protocol(format!("no breakpoint at {:#x}", addr)))?;
        if bp.in_memory {
            return Ok(());
        }
        let original = memory::read_memory(addr, 1)?;
        memory::patch_bytes(addr, &[TRAP_INSTRUCTION])?;
        bp.saved_bytes[0] = original[0];
        bp.in_memory = true;
        Ok(())
    }

    /// Restore the original byte. No-op if not currently installed.
    pub fn remove(&mut self, addr: u64) -> Result<(), RtError> {
        let bp = self
            .find_mut(addr)
            .ok_or_else(|| RtError::Protocol(format!("no breakpoint at {:#x}", addr)))?;
        if !bp.in_memory {
            return Ok(());
        }
        memory::patch_bytes(addr, &bp.saved_bytes)?;
        bp.in_memory = false;
        Ok(())
    }

    /// Restore the original byte in memory without clearing `in_memory`
    /// (§4.3): the auxiliary-breakpoint mechanism is about to re-patch this
    /// address once the debuggee steps past it, so the table's bookkeeping
    /// should still say "this breakpoint is conceptually installed".
    pub fn remove_for_continue(&mut self, addr: u64) -> Result<(), RtError> {
        let bp = self
            .find_mut(addr)
            .ok_or_else(|| RtError::Protocol(format!("no breakpoint at {:#x}", addr)))?;
        if bp.in_memory {
            memory::patch_bytes(addr, &bp.saved_bytes)?;
        }
        Ok(())
    }

    /// Re-patch a breakpoint that was pulled out via [`remove_for_continue`],
    /// without touching `saved_bytes` (already known).
    pub fn reinstall(&mut self, addr: u64) -> Result<(), RtError> {
        let bp = self
            .find_mut(addr)
            .ok_or_else(|| RtError::Protocol(format!("no breakpoint at {:#x}", addr)))?;
        if bp.in_memory {
            memory::patch_bytes(addr, &[TRAP_INSTRUCTION])?;
        }
        Ok(())
    }

    /// Remove from memory (if installed) and drop the table entry entirely.
    pub fn delete(&mut self, addr: u64) -> Result<(), RtError> {
        self.remove(addr)?;
        let bucket = &mut self.buckets[bucket_of(addr)];
        bucket.retain(|b| b.address != addr);
        Ok(())
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.find(addr).is_some()
    }
}

impl Default for BreakpointTable {
    fn default() -> Self {
        BreakpointTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_coalesces_double_create() {
        let mut table = BreakpointTable::new();
        table.create(0x1000, BreakpointKind::User);
        table.create(0x1000, BreakpointKind::User);
        assert_eq!(table.buckets[bucket_of(0x1000)].len(), 1);
    }

    #[test]
    fn install_and_remove_round_trip_bytes() {
        let code: Vec<u8> = vec![0x90, 0x90, 0x90, 0x90];
        let addr = code.as_ptr() as u64;
        let mut table = BreakpointTable::new();
        table.create(addr, BreakpointKind::User);
        table.install(addr).unwrap();
        assert!(table.find(addr).unwrap().in_memory);
        assert_eq!(code[0], TRAP_INSTRUCTION);

        table.remove(addr).unwrap();
        assert!(!table.find(addr).unwrap().in_memory);
        assert_eq!(code[0], 0x90);
    }

    #[test]
    fn remove_for_continue_keeps_in_memory_flag_set() {
        let code: Vec<u8> = vec![0x90];
        let addr = code.as_ptr() as u64;
        let mut table = BreakpointTable::new();
        table.create(addr, BreakpointKind::User);
        table.install(addr).unwrap();

        table.remove_for_continue(addr).unwrap();
        assert_eq!(code[0], 0x90);
        assert!(table.find(addr).unwrap().in_memory);

        table.reinstall(addr).unwrap();
        assert_eq!(code[0], TRAP_INSTRUCTION);
    }

    #[test]
    fn delete_clears_the_table_entry() {
        let code: Vec<u8> = vec![0x90];
        let addr = code.as_ptr() as u64;
        let mut table = BreakpointTable::new();
        table.create(addr, BreakpointKind::User);
        table.install(addr).unwrap();
        table.delete(addr).unwrap();
        assert_eq!(code[0], 0x90);
        assert!(!table.contains(addr));
    }
}
