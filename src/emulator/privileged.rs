// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Privileged-instruction emulation: interrupt-flag toggles, moves to and
//! from control and debug registers, and MSR accesses.

use super::gp_register_index;
use super::unsupported;
use super::Emulator;
use super::Error;
use crate::memory::DataProvider;
use crate::memory::Environment;
use crate::registers::Gp;
use crate::registers::ThreadContext;
use iced_x86::Instruction;
use iced_x86::Mnemonic;
use iced_x86::OpKind;
use iced_x86::Register;

/// The system registers the privileged `MOV` forms may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SystemRegister {
    Cr0,
    Cr3,
    Cr4,
    Cr8,
    Dr7,
}

fn system_register(reg: Register) -> Option<SystemRegister> {
    match reg {
        Register::CR0 => Some(SystemRegister::Cr0),
        Register::CR3 => Some(SystemRegister::Cr3),
        Register::CR4 => Some(SystemRegister::Cr4),
        Register::CR8 => Some(SystemRegister::Cr8),
        Register::DR7 => Some(SystemRegister::Dr7),
        _ => None,
    }
}

impl<P: DataProvider, E: Environment> Emulator<P, E> {
    /// Dispatches one decoded privileged instruction.
    pub(super) fn privileged(
        &mut self,
        instr: &Instruction,
        ctx: &mut ThreadContext,
    ) -> Result<(), Error> {
        match instr.mnemonic() {
            Mnemonic::Cli => {
                tracing::debug!("clearing interrupts");
                Ok(())
            }
            Mnemonic::Sti => {
                tracing::debug!("restoring interrupts");
                Ok(())
            }
            Mnemonic::Mov => self.system_mov(instr, ctx),
            Mnemonic::Rdmsr => self.rdmsr(ctx),
            Mnemonic::Wrmsr => self.wrmsr(ctx),
            _ => Err(unsupported(instr)),
        }
    }

    /// `MOV` with one operand naming CR0/CR3/CR4/CR8 or DR7. Which operand
    /// position holds the system register decides the direction.
    fn system_mov(&mut self, instr: &Instruction, ctx: &mut ThreadContext) -> Result<(), Error> {
        if instr.op0_kind() != OpKind::Register || instr.op1_kind() != OpKind::Register {
            return Err(unsupported(instr));
        }
        if let Some(sys) = system_register(instr.op0_register()) {
            // Write to the system register from the full source GPR.
            let src = gp_register_index(instr.op1_register()).ok_or_else(|| unsupported(instr))?;
            let value = ctx.gp64(src.extended_index);
            tracing::debug!(?sys, value, "writing system register");
            match sys {
                SystemRegister::Cr0 => self.crs.cr0 = value,
                SystemRegister::Cr3 => self.crs.cr3 = value,
                SystemRegister::Cr4 => self.crs.cr4 = value,
                SystemRegister::Cr8 => self.crs.cr8 = value,
                SystemRegister::Dr7 => ctx.dr7 = value,
            }
            Ok(())
        } else if let Some(sys) = system_register(instr.op1_register()) {
            // Read the system register into the full destination GPR.
            let dst = gp_register_index(instr.op0_register()).ok_or_else(|| unsupported(instr))?;
            tracing::debug!(?sys, "reading system register");
            let value = match sys {
                SystemRegister::Cr0 => self.crs.cr0,
                SystemRegister::Cr3 => self.crs.cr3,
                SystemRegister::Cr4 => self.crs.cr4,
                SystemRegister::Cr8 => self.crs.cr8,
                SystemRegister::Dr7 => ctx.dr7,
            };
            ctx.set_gp64(dst.extended_index, value);
            Ok(())
        } else {
            Err(unsupported(instr))
        }
    }

    /// `RDMSR`: `EDX:EAX ← msr[ECX]`, clearing the upper halves of RDX and
    /// RAX as a 32-bit subregister write does.
    fn rdmsr(&mut self, ctx: &mut ThreadContext) -> Result<(), Error> {
        let index = ctx.gp64(Gp::RCX) as u32;
        let Some(entry) = self.msrs.get(index) else {
            tracing::warn!(index, "read of unsupported msr");
            return Err(Error::UnsupportedMsr(index));
        };
        tracing::debug!(name = entry.name, value = entry.value, "reading msr");
        ctx.set_gp64(Gp::RDX, entry.value >> 32);
        ctx.set_gp64(Gp::RAX, entry.value & 0xFFFF_FFFF);
        Ok(())
    }

    /// `WRMSR`: `msr[ECX] ← EDX:EAX`.
    fn wrmsr(&mut self, ctx: &mut ThreadContext) -> Result<(), Error> {
        let index = ctx.gp64(Gp::RCX) as u32;
        let value = (ctx.gp64(Gp::RDX) << 32) | (ctx.gp64(Gp::RAX) & 0xFFFF_FFFF);
        let Some(entry) = self.msrs.get_mut(index) else {
            tracing::warn!(index, "write to unsupported msr");
            return Err(Error::UnsupportedMsr(index));
        };
        entry.value = value;
        tracing::debug!(name = entry.name, value, "writing msr");
        Ok(())
    }
}
