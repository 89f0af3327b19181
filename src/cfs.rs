//! Control-flow successor computation (C5, §4.5).
//!
//! Unlike a ptrace-based tracer reading a remote address space, this runtime
//! is the debuggee: the bytes at `pc` are already mapped into our own
//! address space, so decoding means a direct slice read rather than a
//! peek syscall. The decoder itself is `iced-x86`, the same crate the
//! pack's Windows-side debugger reaches for to classify instructions by
//! control flow.

use iced_x86::{ConditionCode, Decoder, DecoderOptions, FlowControl, Instruction, Mnemonic, OpKind, Register};

use crate::arch::Arch;
use crate::errors::RtError;
use crate::memory;
use crate::registers::Registers;

const MAX_INSTRUCTION_LEN: usize = 16;

fn bitness(arch: Arch) -> u32 {
    match arch {
        Arch::X86 => 32,
        Arch::X86_64 => 64,
    }
}

/// Decode the single instruction at `pc` and compute the address execution
/// will transfer to next, given the current register context.
///
/// Reads are done via direct pointer access rather than [`memory::read_memory`]:
/// an in-flight trap means the bytes at `pc` are known-mapped executable code,
/// and paying for an access-window round trip here would be wasted work on
/// the signal-handler hot path. [`memory::read_memory`] is still used for the
/// `ret` case, which dereferences the stack pointer instead of `pc`.
pub fn control_flow_successor(pc: u64, regs: &Registers) -> Result<u64, RtError> {
    let code = unsafe { std::slice::from_raw_parts(pc as *const u8, MAX_INSTRUCTION_LEN) };
    let mut decoder = Decoder::with_ip(bitness(regs.arch()), code, pc, DecoderOptions::NONE);
    let mut insn = Instruction::default();
    decoder.decode_out(&mut insn);

    if insn.is_invalid() {
        return Err(RtError::Protocol(format!(
            "could not decode instruction at {:#x}",
            pc
        )));
    }

    let next_linear = pc + insn.len() as u64;

    match insn.flow_control() {
        FlowControl::Next | FlowControl::Interrupt | FlowControl::Exception => Ok(next_linear),
        FlowControl::UnconditionalBranch | FlowControl::Call => resolve_branch_target(&insn, regs, next_linear),
        FlowControl::IndirectBranch | FlowControl::IndirectCall => {
            resolve_indirect_target(&insn, regs, next_linear)
        }
        FlowControl::Return => {
            let sp = regs.sp();
            let word_len = regs.arch().word_size();
            let bytes = memory::read_memory(sp, word_len)?;
            Ok(bytes_to_word(&bytes))
        }
        FlowControl::ConditionalBranch => {
            if evaluate_condition(&insn, regs.flags(), regs) {
                resolve_branch_target(&insn, regs, next_linear)
            } else {
                Ok(next_linear)
            }
        }
        FlowControl::XbeginXabortXend => Ok(next_linear),
    }
}

fn bytes_to_word(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

fn resolve_branch_target(insn: &Instruction, _regs: &Registers, fallback: u64) -> Result<u64, RtError> {
    match insn.op0_kind() {
        OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => Ok(insn.near_branch_target()),
        OpKind::FarBranch16 | OpKind::FarBranch32 => Ok(insn.far_branch_selector() as u64),
        _ => Ok(fallback),
    }
}

fn resolve_indirect_target(insn: &Instruction, regs: &Registers, fallback: u64) -> Result<u64, RtError> {
    match insn.op0_kind() {
        OpKind::Register => {
            let reg = insn.op0_register();
            Ok(register_value(reg, regs))
        }
        OpKind::Memory => {
            let addr = memory_operand_address(insn, regs);
            let word_len = regs.arch().word_size();
            let bytes = memory::read_memory(addr, word_len)?;
            Ok(bytes_to_word(&bytes))
        }
        _ => Ok(fallback),
    }
}

/// Effective address of a memory operand: base + index*scale + displacement.
/// iced-x86 exposes all the pieces; we only need to plug in live register
/// values for base/index.
fn memory_operand_address(insn: &Instruction, regs: &Registers) -> u64 {
    let base = insn.memory_base();
    let index = insn.memory_index();
    let scale = insn.memory_index_scale() as u64;
    let disp = insn.memory_displacement64();

    let base_val = if base == Register::None { 0 } else { register_value(base, regs) };
    let index_val = if index == Register::None { 0 } else { register_value(index, regs) };

    base_val.wrapping_add(index_val.wrapping_mul(scale)).wrapping_add(disp)
}

fn register_value(reg: Register, regs: &Registers) -> u64 {
    use crate::arch::{RegX8664, RegX86};

    let arch = regs.arch();
    let tag = match arch {
        Arch::X86_64 => match reg {
            Register::RAX | Register::EAX => RegX8664::Rax as u16,
            Register::RBX | Register::EBX => RegX8664::Rbx as u16,
            Register::RCX | Register::ECX => RegX8664::Rcx as u16,
            Register::RDX | Register::EDX => RegX8664::Rdx as u16,
            Register::RSI | Register::ESI => RegX8664::Rsi as u16,
            Register::RDI | Register::EDI => RegX8664::Rdi as u16,
            Register::RBP | Register::EBP => RegX8664::Rbp as u16,
            Register::RSP | Register::ESP => RegX8664::Rsp as u16,
            Register::R8 => RegX8664::R8 as u16,
            Register::R9 => RegX8664::R9 as u16,
            Register::R10 => RegX8664::R10 as u16,
            Register::R11 => RegX8664::R11 as u16,
            Register::R12 => RegX8664::R12 as u16,
            Register::R13 => RegX8664::R13 as u16,
            Register::R14 => RegX8664::R14 as u16,
            Register::R15 => RegX8664::R15 as u16,
            Register::RIP => RegX8664::Rip as u16,
            _ => return 0,
        },
        Arch::X86 => match reg {
            Register::EAX => RegX86::Eax as u16,
            Register::EBX => RegX86::Ebx as u16,
            Register::ECX => RegX86::Ecx as u16,
            Register::EDX => RegX86::Edx as u16,
            Register::ESI => RegX86::Esi as u16,
            Register::EDI => RegX86::Edi as u16,
            Register::EBP => RegX86::Ebp as u16,
            Register::ESP => RegX86::Esp as u16,
            _ => return 0,
        },
    };
    match regs.get_by_tag(tag) {
        crate::errors::RequestOutcome::Success(v) => v,
        _ => 0,
    }
}

/// RFLAGS bit positions used by the condition-code table below.
mod flag_bits {
    pub const CF: u64 = 1 << 0;
    pub const PF: u64 = 1 << 2;
    pub const ZF: u64 = 1 << 6;
    pub const SF: u64 = 1 << 7;
    pub const OF: u64 = 1 << 11;
}

/// Evaluate the x86 condition-code predicate (§4.5: "O, NO, B, AE, Z, NZ,
/// BE, A, S, NS, P, NP, L, GE, LE, G, CXZ/ECXZ/RCXZ, LOOP/LOOPE/LOOPNE")
/// against the flags register and, for the count-register forms, RCX/ECX.
fn evaluate_condition(insn: &Instruction, flags: u64, regs: &Registers) -> bool {
    use flag_bits::*;
    let cf = flags & CF != 0;
    let pf = flags & PF != 0;
    let zf = flags & ZF != 0;
    let sf = flags & SF != 0;
    let of = flags & OF != 0;

    match insn.condition_code() {
        // `JCXZ`/`JECXZ`/`JRCXZ` and the `LOOP` family aren't expressed as
        // RFLAGS predicates by iced-x86; they decode with `ConditionCode::None`
        // like a handful of other non-predicated forms, so the mnemonic
        // itself is what tells them apart (`counter_form_taken` below).
        ConditionCode::None => counter_form_taken(insn, regs, zf),
        ConditionCode::o => of,
        ConditionCode::no => !of,
        ConditionCode::b => cf,
        ConditionCode::ae => !cf,
        ConditionCode::e => zf,
        ConditionCode::ne => !zf,
        ConditionCode::be => cf || zf,
        ConditionCode::a => !cf && !zf,
        ConditionCode::s => sf,
        ConditionCode::ns => !sf,
        ConditionCode::p => pf,
        ConditionCode::np => !pf,
        ConditionCode::l => sf != of,
        ConditionCode::ge => sf == of,
        ConditionCode::le => zf || (sf != of),
        ConditionCode::g => !zf && (sf == of),
    }
}

/// RCX, read back at the width the current architecture's default operand
/// size uses (no support for an address-size override prefix switching a
/// `loop`/`jcxz` to a narrower counter than its mode's default).
fn rcx_value(regs: &Registers) -> u64 {
    use crate::arch::{RegX8664, RegX86};
    let tag = match regs.arch() {
        Arch::X86_64 => RegX8664::Rcx as u16,
        Arch::X86 => RegX86::Ecx as u16,
    };
    match regs.get_by_tag(tag) {
        crate::errors::RequestOutcome::Success(v) => v,
        _ => 0,
    }
}

/// `JCXZ`/`JECXZ`/`JRCXZ` branch on whether their counter register is
/// already zero; `LOOP`/`LOOPE`/`LOOPNE` decrement it first, then branch if
/// it's still nonzero (`LOOPE`/`LOOPNE` additionally gate on `ZF`, which the
/// decrement itself never touches). Any other mnemonic reaching
/// `ConditionCode::None` is unexpected here; treat it as always-taken rather
/// than silently dropping the branch.
fn counter_form_taken(insn: &Instruction, regs: &Registers, zf: bool) -> bool {
    match insn.mnemonic() {
        Mnemonic::Jcxz => (rcx_value(regs) & 0xffff) == 0,
        Mnemonic::Jecxz => (rcx_value(regs) & 0xffff_ffff) == 0,
        Mnemonic::Jrcxz => rcx_value(regs) == 0,
        Mnemonic::Loop => decremented_counter(regs) != 0,
        Mnemonic::Loope => decremented_counter(regs) != 0 && zf,
        Mnemonic::Loopne => decremented_counter(regs) != 0 && !zf,
        _ => true,
    }
}

fn decremented_counter(regs: &Registers) -> u64 {
    match regs.arch() {
        Arch::X86_64 => rcx_value(regs).wrapping_sub(1),
        Arch::X86 => (rcx_value(regs) as u32).wrapping_sub(1) as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::registers::Registers;

    #[test]
    fn straight_line_nop_advances_by_one_byte() {
        let code: [u8; 4] = [0x90, 0x90, 0x90, 0x90];
        let pc = code.as_ptr() as u64;
        let regs = Registers::zeroed(Arch::X86_64);
        let next = control_flow_successor(pc, &regs).unwrap();
        assert_eq!(next, pc + 1);
    }

    #[test]
    fn unconditional_short_jump_targets_displacement() {
        // eb 02: jmp +2 (relative to the end of this 2-byte instruction)
        let code: [u8; 4] = [0xeb, 0x02, 0x90, 0x90];
        let pc = code.as_ptr() as u64;
        let regs = Registers::zeroed(Arch::X86_64);
        let next = control_flow_successor(pc, &regs).unwrap();
        assert_eq!(next, pc + 2 + 2);
    }
}
