// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Arithmetic and compare-class emulation for faulting memory reads.

use super::gp_register_index;
use super::rflags::update_flags_cmp;
use super::rflags::update_flags_test;
use super::unsupported;
use super::Emulator;
use super::Error;
use crate::memory::load_le;
use crate::memory::DataProvider;
use crate::memory::Environment;
use crate::registers::ThreadContext;
use iced_x86::Instruction;
use iced_x86::OpKind;

/// A binary operation whose destination register is merged under the
/// partial-register width rules. Flag effects are modeled for the compare
/// class only.
pub(super) trait ArithOp {
    fn op(left: u64, right: u64) -> u64;
}

pub(super) struct OrOp;
impl ArithOp for OrOp {
    fn op(left: u64, right: u64) -> u64 {
        left | right
    }
}

pub(super) struct XorOp;
impl ArithOp for XorOp {
    fn op(left: u64, right: u64) -> u64 {
        left ^ right
    }
}

pub(super) struct AndOp;
impl ArithOp for AndOp {
    fn op(left: u64, right: u64) -> u64 {
        left & right
    }
}

pub(super) struct AddOp;
impl ArithOp for AddOp {
    fn op(left: u64, right: u64) -> u64 {
        left.wrapping_add(right)
    }
}

pub(super) struct SubOp;
impl ArithOp for SubOp {
    fn op(left: u64, right: u64) -> u64 {
        left.wrapping_sub(right)
    }
}

fn is_immediate(kind: OpKind) -> bool {
    matches!(
        kind,
        OpKind::Immediate8
            | OpKind::Immediate16
            | OpKind::Immediate32
            | OpKind::Immediate64
            | OpKind::Immediate8to16
            | OpKind::Immediate8to32
            | OpKind::Immediate8to64
            | OpKind::Immediate32to64
    )
}

/// Extracts `(left, right, operand_size)` for a compare-class instruction
/// with one memory operand translated to `hva`. The memory value keeps its
/// architectural operand position, except that immediate forms compare
/// memory-as-left the way the fault dispatcher's source-pointer path does.
fn compare_operands(
    instr: &Instruction,
    ctx: &ThreadContext,
    hva: usize,
) -> Result<(u64, u64, usize), Error> {
    match (instr.op0_kind(), instr.op1_kind()) {
        // op [mem], reg
        (OpKind::Memory, OpKind::Register) => {
            let reg = gp_register_index(instr.op1_register()).ok_or_else(|| unsupported(instr))?;
            let size = reg.size_bytes();
            // SAFETY: the entry-point contract guarantees translated
            // addresses are valid for the operand width.
            let mem = unsafe { load_le(hva, size) };
            Ok((mem, ctx.gp(reg), size))
        }
        // op reg, [mem]
        (OpKind::Register, OpKind::Memory) => {
            let reg = gp_register_index(instr.op0_register()).ok_or_else(|| unsupported(instr))?;
            let size = reg.size_bytes();
            // SAFETY: see above.
            let mem = unsafe { load_le(hva, size) };
            Ok((ctx.gp(reg), mem, size))
        }
        // op [mem], imm
        (OpKind::Memory, k1) if is_immediate(k1) => {
            let size = instr.memory_size().size();
            // SAFETY: see above.
            let mem = unsafe { load_le(hva, size) };
            Ok((mem, instr.immediate(1), size))
        }
        // op imm, [mem]
        (k0, OpKind::Memory) if is_immediate(k0) => {
            let size = instr.memory_size().size();
            // SAFETY: see above.
            let mem = unsafe { load_le(hva, size) };
            Ok((mem, instr.immediate(0), size))
        }
        _ => Err(unsupported(instr)),
    }
}

impl<P: DataProvider, E: Environment> Emulator<P, E> {
    /// `reg ← reg ⊙ [hva]` under the partial-register width rules.
    pub(super) fn arith_read<Op: ArithOp>(
        &mut self,
        instr: &Instruction,
        ctx: &mut ThreadContext,
        hva: usize,
    ) -> Result<(), Error> {
        if instr.op0_kind() != OpKind::Register || instr.op1_kind() != OpKind::Memory {
            return Err(unsupported(instr));
        }
        let reg = gp_register_index(instr.op0_register()).ok_or_else(|| unsupported(instr))?;
        let size = reg.size_bytes();
        // SAFETY: the entry-point contract guarantees translated addresses
        // are valid for the operand width.
        let mem = unsafe { load_le(hva, size) };
        let result = Op::op(ctx.gp(reg), mem);
        ctx.set_gp(reg, result);
        Ok(())
    }

    /// `CMP` with a memory operand: flags only.
    pub(super) fn cmp(
        &mut self,
        instr: &Instruction,
        ctx: &mut ThreadContext,
        hva: usize,
    ) -> Result<(), Error> {
        let (left, right, size) = compare_operands(instr, ctx, hva)?;
        let mut flags = ctx.rflags;
        update_flags_cmp(&mut flags, size, left, right);
        ctx.rflags = flags;
        Ok(())
    }

    /// `TEST` with a memory operand: flags only. RF is set on every emulated
    /// `TEST`; the host dispatcher relies on it when resuming.
    pub(super) fn test(
        &mut self,
        instr: &Instruction,
        ctx: &mut ThreadContext,
        hva: usize,
    ) -> Result<(), Error> {
        let (left, right, size) = compare_operands(instr, ctx, hva)?;
        let mut flags = ctx.rflags;
        update_flags_test(&mut flags, size, left, right);
        flags.set_resume(true);
        ctx.rflags = flags;
        Ok(())
    }
}
