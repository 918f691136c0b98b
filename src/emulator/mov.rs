// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MOV-family emulation for faulting memory references.

use super::gp_register_index;
use super::unsupported;
use super::Emulator;
use super::Error;
use crate::memory::load_le;
use crate::memory::store_le;
use crate::memory::DataProvider;
use crate::memory::Environment;
use iced_x86::Instruction;
use iced_x86::OpKind;

use crate::registers::ThreadContext;

impl<P: DataProvider, E: Environment> Emulator<P, E> {
    /// `reg ← [hva]` with the partial-register width rules.
    pub(super) fn mov_read(
        &mut self,
        instr: &Instruction,
        ctx: &mut ThreadContext,
        hva: usize,
    ) -> Result<(), Error> {
        if instr.op0_kind() != OpKind::Register || instr.op1_kind() != OpKind::Memory {
            return Err(unsupported(instr));
        }
        let reg = gp_register_index(instr.op0_register()).ok_or_else(|| unsupported(instr))?;
        // SAFETY: the entry-point contract guarantees translated addresses
        // are valid for the operand width.
        let value = unsafe { load_le(hva, reg.size_bytes()) };
        ctx.set_gp(reg, value);
        Ok(())
    }

    /// `[hva] ← reg`.
    pub(super) fn mov_write(
        &mut self,
        instr: &Instruction,
        ctx: &mut ThreadContext,
        hva: usize,
    ) -> Result<(), Error> {
        if instr.op0_kind() != OpKind::Memory || instr.op1_kind() != OpKind::Register {
            return Err(unsupported(instr));
        }
        let reg = gp_register_index(instr.op1_register()).ok_or_else(|| unsupported(instr))?;
        // SAFETY: the entry-point contract guarantees translated addresses
        // are valid for the operand width.
        unsafe { store_le(hva, reg.size_bytes(), ctx.gp(reg)) };
        Ok(())
    }

    /// `reg ← zext [hva]`, source width per the memory operand.
    pub(super) fn movzx_read(
        &mut self,
        instr: &Instruction,
        ctx: &mut ThreadContext,
        hva: usize,
    ) -> Result<(), Error> {
        if instr.op0_kind() != OpKind::Register || instr.op1_kind() != OpKind::Memory {
            return Err(unsupported(instr));
        }
        let reg = gp_register_index(instr.op0_register()).ok_or_else(|| unsupported(instr))?;
        // SAFETY: see above.
        let value = unsafe { load_le(hva, instr.memory_size().size()) };
        ctx.set_gp(reg, value);
        Ok(())
    }

    /// `reg ← sext [hva]`, source width per the memory operand.
    pub(super) fn movsx_read(
        &mut self,
        instr: &Instruction,
        ctx: &mut ThreadContext,
        hva: usize,
    ) -> Result<(), Error> {
        if instr.op0_kind() != OpKind::Register || instr.op1_kind() != OpKind::Memory {
            return Err(unsupported(instr));
        }
        let reg = gp_register_index(instr.op0_register()).ok_or_else(|| unsupported(instr))?;
        let size = instr.memory_size().size();
        // SAFETY: see above.
        let raw = unsafe { load_le(hva, size) };
        let shift = 64 - size * 8;
        let value = ((raw as i64) << shift) >> shift;
        ctx.set_gp(reg, value as u64);
        Ok(())
    }
}
