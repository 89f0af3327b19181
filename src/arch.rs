//! Architecture tags and register enumerations (§6 "Architectures").
//!
//! Register tags are disjoint per architecture by construction: x86_64 tags
//! occupy `0x000..0x100`, x86 tags occupy `0x100..0x200`. A request's `reg:u16`
//! field is validated against the process's compiled-in architecture before
//! any register access is attempted.

use serde::{Deserialize, Serialize};

#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Arch {
    X86 = 0,
    X86_64 = 1,
}

impl Arch {
    pub fn native() -> Arch {
        if cfg!(target_arch = "x86_64") {
            Arch::X86_64
        } else {
            Arch::X86
        }
    }

    pub fn word_size(self) -> usize {
        match self {
            Arch::X86 => 4,
            Arch::X86_64 => 8,
        }
    }
}

/// x86_64 register tags, `0x000..0x100`.
#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegX8664 {
    Rax = 0x00,
    Rbx = 0x01,
    Rcx = 0x02,
    Rdx = 0x03,
    Rsi = 0x04,
    Rdi = 0x05,
    Rbp = 0x06,
    Rsp = 0x07,
    R8 = 0x08,
    R9 = 0x09,
    R10 = 0x0a,
    R11 = 0x0b,
    R12 = 0x0c,
    R13 = 0x0d,
    R14 = 0x0e,
    R15 = 0x0f,
    Rip = 0x10,
    Rflags = 0x11,
    Cs = 0x12,
    Ss = 0x13,
    Ds = 0x14,
    Es = 0x15,
    Fs = 0x16,
    Gs = 0x17,
    FsBase = 0x18,
    GsBase = 0x19,
    OrigRax = 0x1a,
    /// First of 8 x87 FPU stack registers (`St0..=St7`), `0x20..0x28`.
    St0 = 0x20,
    /// First of 16 SSE/AVX-128 registers (`Xmm0..=Xmm15`), `0x30..0x40`.
    Xmm0 = 0x30,
}

impl RegX8664 {
    pub fn in_range(tag: u16) -> bool {
        tag < 0x100
    }

    pub fn is_float(tag: u16) -> bool {
        (0x20..0x40).contains(&tag)
    }

    pub fn pc_tag() -> u16 {
        RegX8664::Rip as u16
    }

    pub fn sp_tag() -> u16 {
        RegX8664::Rsp as u16
    }

    pub fn flags_tag() -> u16 {
        RegX8664::Rflags as u16
    }
}

/// x86 (32-bit) register tags, `0x100..0x200`.
#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegX86 {
    Eax = 0x100,
    Ebx = 0x101,
    Ecx = 0x102,
    Edx = 0x103,
    Esi = 0x104,
    Edi = 0x105,
    Ebp = 0x106,
    Esp = 0x107,
    Eip = 0x108,
    Eflags = 0x109,
    Cs = 0x10a,
    Ss = 0x10b,
    Ds = 0x10c,
    Es = 0x10d,
    Fs = 0x10e,
    Gs = 0x10f,
    OrigEax = 0x110,
    St0 = 0x120,
    Xmm0 = 0x130,
}

impl RegX86 {
    pub fn in_range(tag: u16) -> bool {
        (0x100..0x200).contains(&tag)
    }

    pub fn is_float(tag: u16) -> bool {
        (0x120..0x140).contains(&tag)
    }

    pub fn pc_tag() -> u16 {
        RegX86::Eip as u16
    }

    pub fn sp_tag() -> u16 {
        RegX86::Esp as u16
    }

    pub fn flags_tag() -> u16 {
        RegX86::Eflags as u16
    }
}

/// True if `tag` names a register belonging to `arch`.
pub fn tag_belongs_to_arch(arch: Arch, tag: u16) -> bool {
    match arch {
        Arch::X86_64 => RegX8664::in_range(tag),
        Arch::X86 => RegX86::in_range(tag),
    }
}

pub fn tag_is_float(arch: Arch, tag: u16) -> bool {
    match arch {
        Arch::X86_64 => RegX8664::is_float(tag),
        Arch::X86 => RegX86::is_float(tag),
    }
}

pub fn pc_tag(arch: Arch) -> u16 {
    match arch {
        Arch::X86_64 => RegX8664::pc_tag(),
        Arch::X86 => RegX86::pc_tag(),
    }
}

pub fn sp_tag(arch: Arch) -> u16 {
    match arch {
        Arch::X86_64 => RegX8664::sp_tag(),
        Arch::X86 => RegX86::sp_tag(),
    }
}

pub fn flags_tag(arch: Arch) -> u16 {
    match arch {
        Arch::X86_64 => RegX8664::flags_tag(),
        Arch::X86 => RegX86::flags_tag(),
    }
}
