//! Register context access (part of C5/C8, grounded on the teacher's own
//! `registers.rs`: a union over per-arch raw register structs plus
//! `rd_get_reg!`/`rd_set_reg!`-style accessor macros).
//!
//! Unlike a ptrace-based tracer, which must `PTRACE_GETREGS`/`PTRACE_SETREGS`
//! out-of-process, this runtime lives inside the debuggee: the "register
//! context" is simply the `ucontext_t` the kernel handed the signal handler,
//! cached into one of these on trap entry (§3 "Cached signal event").

use crate::arch::{self, Arch, RegX86, RegX8664};
use crate::errors::RequestOutcome;

/// 32-bit `struct user_regs_struct` layout from `<sys/user.h>` on i386 Linux.
/// Hand-written because the `libc` crate only exports the native target's
/// layout, and a process built for x86_64 never compiles in the i386 one.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug)]
pub struct X86UserRegs {
    pub ebx: i32,
    pub ecx: i32,
    pub edx: i32,
    pub esi: i32,
    pub edi: i32,
    pub ebp: i32,
    pub eax: i32,
    pub xds: i32,
    pub xes: i32,
    pub xfs: i32,
    pub xgs: i32,
    pub orig_eax: i32,
    pub eip: i32,
    pub xcs: i32,
    pub eflags: i32,
    pub esp: i32,
    pub xss: i32,
}

#[derive(Copy, Clone)]
union RegistersUnion {
    x86: X86UserRegs,
    #[cfg(target_arch = "x86_64")]
    x64: libc::user_regs_struct,
}

macro_rules! udi_get_reg {
    ($slf:expr, $x86case:ident, $x64case:ident) => {
        unsafe {
            match $slf.arch {
                Arch::X86 => $slf.u.x86.$x86case as u64,
                #[cfg(target_arch = "x86_64")]
                Arch::X86_64 => $slf.u.x64.$x64case as u64,
                #[cfg(not(target_arch = "x86_64"))]
                Arch::X86_64 => unreachable!("x86_64 context on a non-x86_64 build"),
            }
        }
    };
}

macro_rules! udi_set_reg {
    ($slf:expr, $x86case:ident, $x64case:ident, $val:expr) => {
        unsafe {
            match $slf.arch {
                Arch::X86 => $slf.u.x86.$x86case = $val as i32,
                #[cfg(target_arch = "x86_64")]
                Arch::X86_64 => $slf.u.x64.$x64case = $val as u64,
                #[cfg(not(target_arch = "x86_64"))]
                Arch::X86_64 => unreachable!("x86_64 context on a non-x86_64 build"),
            }
        }
    };
}

/// A saved machine register context, tagged with the architecture it was
/// captured under.
#[derive(Copy, Clone)]
pub struct Registers {
    arch: Arch,
    u: RegistersUnion,
}

impl Registers {
    pub fn zeroed(arch: Arch) -> Registers {
        Registers {
            arch,
            u: RegistersUnion {
                x86: X86UserRegs::default(),
            },
        }
    }

    #[cfg(target_arch = "x86_64")]
    pub fn from_native(regs: libc::user_regs_struct) -> Registers {
        Registers {
            arch: Arch::X86_64,
            u: RegistersUnion { x64: regs },
        }
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn pc(&self) -> u64 {
        udi_get_reg!(self, eip, rip)
    }

    pub fn set_pc(&mut self, val: u64) {
        udi_set_reg!(self, eip, rip, val);
    }

    pub fn sp(&self) -> u64 {
        udi_get_reg!(self, esp, rsp)
    }

    pub fn flags(&self) -> u64 {
        udi_get_reg!(self, eflags, eflags)
    }

    /// Rewind the PC by `n` bytes. Used on trap entry to undo the `int3`
    /// instruction width before looking the address up in the breakpoint
    /// table (§4.6 step 4).
    pub fn rewind_pc(&mut self, n: u64) {
        let pc = self.pc();
        self.set_pc(pc.wrapping_sub(n));
    }

    /// Read a general-purpose or flags register by protocol tag.
    /// Floating-point tags are accepted by the dispatch layer but rejected
    /// here (§4.8, §9 Open Questions, resolved in DESIGN.md: unimplemented,
    /// not guessed at).
    pub fn get_by_tag(&self, tag: u16) -> RequestOutcome<u64> {
        if !arch::tag_belongs_to_arch(self.arch, tag) {
            return RequestOutcome::failure(format!(
                "register tag {:#x} does not belong to architecture {:?}",
                tag, self.arch
            ));
        }
        if arch::tag_is_float(self.arch, tag) {
            return RequestOutcome::failure("floating point registers are not supported");
        }
        match self.arch {
            Arch::X86_64 => self.get_x86_64(tag),
            Arch::X86 => self.get_x86(tag),
        }
    }

    pub fn set_by_tag(&mut self, tag: u16, value: u64) -> RequestOutcome<()> {
        if !arch::tag_belongs_to_arch(self.arch, tag) {
            return RequestOutcome::failure(format!(
                "register tag {:#x} does not belong to architecture {:?}",
                tag, self.arch
            ));
        }
        if arch::tag_is_float(self.arch, tag) {
            return RequestOutcome::failure("floating point registers are not supported");
        }
        match self.arch {
            Arch::X86_64 => self.set_x86_64(tag, value),
            Arch::X86 => self.set_x86(tag, value),
        }
    }

    #[cfg(target_arch = "x86_64")]
    fn get_x86_64(&self, tag: u16) -> RequestOutcome<u64> {
        use RegX8664::*;
        let val = unsafe {
            let r = &self.u.x64;
            match tag {
                t if t == Rax as u16 => r.rax,
                t if t == Rbx as u16 => r.rbx,
                t if t == Rcx as u16 => r.rcx,
                t if t == Rdx as u16 => r.rdx,
                t if t == Rsi as u16 => r.rsi,
                t if t == Rdi as u16 => r.rdi,
                t if t == Rbp as u16 => r.rbp,
                t if t == Rsp as u16 => r.rsp,
                t if t == R8 as u16 => r.r8,
                t if t == R9 as u16 => r.r9,
                t if t == R10 as u16 => r.r10,
                t if t == R11 as u16 => r.r11,
                t if t == R12 as u16 => r.r12,
                t if t == R13 as u16 => r.r13,
                t if t == R14 as u16 => r.r14,
                t if t == R15 as u16 => r.r15,
                t if t == Rip as u16 => r.rip,
                t if t == Rflags as u16 => r.eflags,
                t if t == Cs as u16 => r.cs,
                t if t == Ss as u16 => r.ss,
                t if t == Ds as u16 => r.ds,
                t if t == Es as u16 => r.es,
                t if t == Fs as u16 => r.fs,
                t if t == Gs as u16 => r.gs,
                t if t == FsBase as u16 => r.fs_base,
                t if t == GsBase as u16 => r.gs_base,
                t if t == OrigRax as u16 => r.orig_rax,
                _ => return RequestOutcome::failure(format!("unknown register tag {:#x}", tag)),
            }
        };
        RequestOutcome::Success(val)
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn get_x86_64(&self, _tag: u16) -> RequestOutcome<u64> {
        RequestOutcome::failure("x86_64 context unavailable on this build")
    }

    #[cfg(target_arch = "x86_64")]
    fn set_x86_64(&mut self, tag: u16, value: u64) -> RequestOutcome<()> {
        use RegX8664::*;
        unsafe {
            let r = &mut self.u.x64;
            match tag {
                t if t == Rax as u16 => r.rax = value,
                t if t == Rbx as u16 => r.rbx = value,
                t if t == Rcx as u16 => r.rcx = value,
                t if t == Rdx as u16 => r.rdx = value,
                t if t == Rsi as u16 => r.rsi = value,
                t if t == Rdi as u16 => r.rdi = value,
                t if t == Rbp as u16 => r.rbp = value,
                t if t == Rsp as u16 => r.rsp = value,
                t if t == R8 as u16 => r.r8 = value,
                t if t == R9 as u16 => r.r9 = value,
                t if t == R10 as u16 => r.r10 = value,
                t if t == R11 as u16 => r.r11 = value,
                t if t == R12 as u16 => r.r12 = value,
                t if t == R13 as u16 => r.r13 = value,
                t if t == R14 as u16 => r.r14 = value,
                t if t == R15 as u16 => r.r15 = value,
                t if t == Rip as u16 => r.rip = value,
                t if t == Rflags as u16 => r.eflags = value,
                t if t == FsBase as u16 => r.fs_base = value,
                t if t == GsBase as u16 => r.gs_base = value,
                _ => return RequestOutcome::failure(format!("register {:#x} is not writable", tag)),
            }
        }
        RequestOutcome::Success(())
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn set_x86_64(&mut self, _tag: u16, _value: u64) -> RequestOutcome<()> {
        RequestOutcome::failure("x86_64 context unavailable on this build")
    }

    fn get_x86(&self, tag: u16) -> RequestOutcome<u64> {
        use RegX86::*;
        let val = unsafe {
            let r = &self.u.x86;
            match tag {
                t if t == Eax as u16 => r.eax as u32 as u64,
                t if t == Ebx as u16 => r.ebx as u32 as u64,
                t if t == Ecx as u16 => r.ecx as u32 as u64,
                t if t == Edx as u16 => r.edx as u32 as u64,
                t if t == Esi as u16 => r.esi as u32 as u64,
                t if t == Edi as u16 => r.edi as u32 as u64,
                t if t == Ebp as u16 => r.ebp as u32 as u64,
                t if t == Esp as u16 => r.esp as u32 as u64,
                t if t == Eip as u16 => r.eip as u32 as u64,
                t if t == Eflags as u16 => r.eflags as u32 as u64,
                t if t == Cs as u16 => r.xcs as u32 as u64,
                t if t == Ss as u16 => r.xss as u32 as u64,
                t if t == Ds as u16 => r.xds as u32 as u64,
                t if t == Es as u16 => r.xes as u32 as u64,
                t if t == Fs as u16 => r.xfs as u32 as u64,
                t if t == Gs as u16 => r.xgs as u32 as u64,
                t if t == OrigEax as u16 => r.orig_eax as u32 as u64,
                _ => return RequestOutcome::failure(format!("unknown register tag {:#x}", tag)),
            }
        };
        RequestOutcome::Success(val)
    }

    fn set_x86(&mut self, tag: u16, value: u64) -> RequestOutcome<()> {
        use RegX86::*;
        unsafe {
            let r = &mut self.u.x86;
            match tag {
                t if t == Eax as u16 => r.eax = value as i32,
                t if t == Ebx as u16 => r.ebx = value as i32,
                t if t == Ecx as u16 => r.ecx = value as i32,
                t if t == Edx as u16 => r.edx = value as i32,
                t if t == Esi as u16 => r.esi = value as i32,
                t if t == Edi as u16 => r.edi = value as i32,
                t if t == Ebp as u16 => r.ebp = value as i32,
                t if t == Esp as u16 => r.esp = value as i32,
                t if t == Eip as u16 => r.eip = value as i32,
                t if t == Eflags as u16 => r.eflags = value as i32,
                _ => return RequestOutcome::failure(format!("register {:#x} is not writable", tag)),
            }
        }
        RequestOutcome::Success(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn get_set_round_trip_x86_64() {
        let mut regs = Registers::from_native(unsafe { std::mem::zeroed() });
        regs.set_pc(0x4000);
        assert_eq!(regs.pc(), 0x4000);
        regs.rewind_pc(1);
        assert_eq!(regs.pc(), 0x3fff);

        match regs.set_by_tag(RegX8664::Rax as u16, 42) {
            RequestOutcome::Success(()) => {}
            _ => panic!("expected success"),
        }
        match regs.get_by_tag(RegX8664::Rax as u16) {
            RequestOutcome::Success(v) => assert_eq!(v, 42),
            _ => panic!("expected success"),
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn float_registers_are_rejected() {
        let regs = Registers::from_native(unsafe { std::mem::zeroed() });
        match regs.get_by_tag(RegX8664::Xmm0 as u16) {
            RequestOutcome::Failure(_) => {}
            _ => panic!("expected failure for floating point register"),
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn wrong_arch_tag_is_rejected() {
        let regs = Registers::from_native(unsafe { std::mem::zeroed() });
        match regs.get_by_tag(RegX86::Eax as u16) {
            RequestOutcome::Failure(_) => {}
            _ => panic!("expected failure for cross-arch tag"),
        }
    }
}
