// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Implements the x86-64 instruction emulator driven by host fault dispatch.
//!
//! A trapped fault delivers the captured [`ThreadContext`] to one of the two
//! entry points: [`Emulator::emulate_privileged`] for privileged-instruction
//! faults and [`Emulator::emulate_memory_access`] for accesses to guest
//! addresses with no native host mapping. Each call decodes exactly one
//! instruction at `RIP`, applies its architectural effect, and advances `RIP`
//! by the decoded length; on failure the context and all guest-visible memory
//! are left untouched.

use crate::defs::ADDRESS_SENTINEL;
use crate::defs::KUSD_MIN;
use crate::defs::KUSD_USERMODE;
use crate::defs::PAGE_MAP_WINDOW;
use crate::memory::DataProvider;
use crate::memory::Environment;
use crate::memory::MemoryTracker;
use crate::registers::Gp;
use crate::registers::GpSize;
use crate::registers::RegisterIndex;
use crate::registers::ThreadContext;
use crate::state::ControlRegisters;
use crate::state::MsrTable;
use crate::state::TopLevelPageTable;
use iced_x86::Code;
use iced_x86::Decoder;
use iced_x86::DecoderOptions;
use iced_x86::Instruction;
use iced_x86::Mnemonic;
use iced_x86::OpKind;
use iced_x86::Register;
use thiserror::Error;

mod arith;
mod mov;
mod privileged;
mod rflags;

/// Architectural maximum instruction length; the decode window read at `RIP`.
pub const MAX_INSTRUCTION_BYTES: usize = 15;

/// The user-shared-data page is a single page.
const KUSD_LEN: u64 = 0x1000;

#[derive(Debug, Error)]
pub enum Error {
    /// The bytes at `RIP` did not decode to a valid instruction.
    #[error("failed to decode instruction at {0:#x}")]
    DecodeFailure(u64),
    /// The faulting guest address resolved to no provider and no mapping.
    #[error("no host mapping for guest address {0:#x}")]
    UnmappedAddress(u64),
    /// `RDMSR`/`WRMSR` named an index outside the emulated table.
    #[error("unsupported msr {0:#x}")]
    UnsupportedMsr(u32),
    /// An instruction shape the emulator does not handle. This is an
    /// implementation gap, not a guest error.
    #[error("unsupported instruction {mnemonic:?} with operands {operands:?}")]
    UnsupportedInstruction {
        mnemonic: Mnemonic,
        operands: Vec<OpKind>,
    },
}

impl Error {
    /// True for implementation gaps, false for failures the caller may
    /// translate into a guest fault.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::UnsupportedInstruction { .. })
    }
}

/// The access direction of a memory fault, as reported by the host's
/// exception dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
}

/// An instruction emulator stepping captured fault contexts forward.
///
/// Holds the process-wide stores (virtual control registers, MSR table,
/// virtual-to-host map, top-level paging structure); callers that dispatch
/// faults from multiple threads serialize on the `&mut` receiver.
pub struct Emulator<P, E> {
    tracker: MemoryTracker,
    crs: ControlRegisters,
    msrs: MsrTable,
    page_map: Box<TopLevelPageTable>,
    provider: P,
    env: E,
}

impl<P: DataProvider, E: Environment> Emulator<P, E> {
    /// Creates the emulator: seeds the fixed virtual-to-host mappings (the
    /// user-shared-data page and the top-level paging window) and the MSR
    /// table.
    pub fn new(provider: P, env: E) -> Self {
        let page_map = Box::new(TopLevelPageTable::new());
        let mut tracker = MemoryTracker::new();
        tracker.add_mapping(KUSD_MIN, KUSD_LEN, KUSD_USERMODE as usize);
        tracker.add_mapping(
            PAGE_MAP_WINDOW,
            (page_map.entries.len() * 8) as u64,
            page_map.entries.as_ptr() as usize,
        );
        Emulator {
            tracker,
            crs: ControlRegisters::default(),
            msrs: MsrTable::default(),
            page_map,
            provider,
            env,
        }
    }

    /// The virtual-to-host map, for registering further translations at
    /// runtime.
    pub fn tracker_mut(&mut self) -> &mut MemoryTracker {
        &mut self.tracker
    }

    pub fn control_registers(&self) -> &ControlRegisters {
        &self.crs
    }

    pub fn msrs(&self) -> &MsrTable {
        &self.msrs
    }

    pub fn page_map(&self) -> &TopLevelPageTable {
        &self.page_map
    }

    pub fn page_map_mut(&mut self) -> &mut TopLevelPageTable {
        &mut self.page_map
    }

    /// Emulates the privileged instruction at `ctx.rip`.
    ///
    /// # Safety
    ///
    /// `ctx.rip` must address the faulting instruction's bytes, readable for
    /// [`MAX_INSTRUCTION_BYTES`] in the host process.
    pub unsafe fn emulate_privileged(&mut self, ctx: &mut ThreadContext) -> Result<(), Error> {
        let instr = self.decode(ctx)?;
        self.privileged(&instr, ctx)?;
        ctx.rip = ctx.rip.wrapping_add(instr.len() as u64);
        Ok(())
    }

    /// Emulates the memory-accessing instruction at `ctx.rip`, whose
    /// faulting reference was to `fault_addr`.
    ///
    /// # Safety
    ///
    /// `ctx.rip` must address the faulting instruction's bytes, readable for
    /// [`MAX_INSTRUCTION_BYTES`] in the host process. Every registered
    /// mapping and every provider-returned host address must be valid for
    /// accesses of the operand width for the duration of the call.
    pub unsafe fn emulate_memory_access(
        &mut self,
        fault_addr: u64,
        ctx: &mut ThreadContext,
        op: OperationKind,
    ) -> Result<(), Error> {
        let instr = self.decode(ctx)?;
        let hva = self.translate(fault_addr)?;
        match op {
            OperationKind::Read => self.memory_read(&instr, ctx, hva)?,
            OperationKind::Write => self.memory_write(&instr, ctx, hva)?,
        }
        ctx.rip = ctx.rip.wrapping_add(instr.len() as u64);
        Ok(())
    }

    /// Decodes the single instruction at `ctx.rip` with the long-mode,
    /// 64-bit-address profile.
    fn decode(&self, ctx: &ThreadContext) -> Result<Instruction, Error> {
        // SAFETY: per the entry-point contract, `ctx.rip` points at the
        // faulting instruction inside a host-mapped image, readable for the
        // maximum instruction length.
        let bytes =
            unsafe { std::slice::from_raw_parts(ctx.rip as *const u8, MAX_INSTRUCTION_BYTES) };
        let mut decoder = Decoder::with_ip(64, bytes, ctx.rip, DecoderOptions::NONE);
        let instr = decoder.decode();
        if instr.code() == Code::INVALID {
            tracing::warn!(
                rip = ctx.rip,
                error = ?decoder.last_error(),
                "could not decode instruction"
            );
            return Err(Error::DecodeFailure(ctx.rip));
        }
        Ok(instr)
    }

    /// Resolves a guest address to a host address: data providers take
    /// precedence, then the virtual-to-host map; the all-ones sentinel fails
    /// without diagnostics, anything else unresolved is reported to the
    /// environment and fails.
    fn translate(&mut self, gva: u64) -> Result<usize, Error> {
        if let Some(hva) = self.provider.find_data(gva) {
            return Ok(hva);
        }
        if let Some(hva) = self.tracker.get_host(gva) {
            tracing::trace!(gva, hva, "translated guest address");
            return Ok(hva);
        }
        if gva != ADDRESS_SENTINEL {
            self.env.check_ptr(gva);
            tracing::warn!(gva, "guest address has no usermode mapping");
        }
        Err(Error::UnmappedAddress(gva))
    }

    /// Dispatches an instruction whose memory operand is the fault source.
    fn memory_read(
        &mut self,
        instr: &Instruction,
        ctx: &mut ThreadContext,
        hva: usize,
    ) -> Result<(), Error> {
        match instr.mnemonic() {
            Mnemonic::Mov => self.mov_read(instr, ctx, hva),
            Mnemonic::Movzx => self.movzx_read(instr, ctx, hva),
            Mnemonic::Movsxd => self.movsx_read(instr, ctx, hva),
            Mnemonic::Or => self.arith_read::<arith::OrOp>(instr, ctx, hva),
            Mnemonic::Xor => self.arith_read::<arith::XorOp>(instr, ctx, hva),
            Mnemonic::And => self.arith_read::<arith::AndOp>(instr, ctx, hva),
            Mnemonic::Add => self.arith_read::<arith::AddOp>(instr, ctx, hva),
            Mnemonic::Sub => self.arith_read::<arith::SubOp>(instr, ctx, hva),
            Mnemonic::Cmp => self.cmp(instr, ctx, hva),
            Mnemonic::Test => self.test(instr, ctx, hva),
            _ => Err(unsupported(instr)),
        }
    }

    /// Dispatches an instruction whose memory operand is the fault
    /// destination. Read-modify-write forms (`or [mem], reg` and friends)
    /// are unsupported.
    fn memory_write(
        &mut self,
        instr: &Instruction,
        ctx: &mut ThreadContext,
        hva: usize,
    ) -> Result<(), Error> {
        match instr.mnemonic() {
            Mnemonic::Mov => self.mov_write(instr, ctx, hva),
            _ => Err(unsupported(instr)),
        }
    }
}

/// Builds the fatal diagnostic for an unhandled instruction shape.
fn unsupported(instr: &Instruction) -> Error {
    Error::UnsupportedInstruction {
        mnemonic: instr.mnemonic(),
        operands: (0..instr.op_count()).map(|i| instr.op_kind(i)).collect(),
    }
}

/// Resolves a decoded register id to its enclosing 64-bit register and
/// operand width. Non-GPR operands have no index.
fn gp_register_index(reg: Register) -> Option<RegisterIndex> {
    let size = match reg.size() {
        1 => {
            if reg >= Register::SPL || reg < Register::AH {
                GpSize::BYTE(0)
            } else {
                GpSize::BYTE(8)
            }
        }
        2 => GpSize::WORD,
        4 => GpSize::DWORD,
        8 => GpSize::QWORD,
        _ => return None,
    };
    let extended_index = match reg.full_register() {
        Register::RAX => Gp::RAX,
        Register::RCX => Gp::RCX,
        Register::RDX => Gp::RDX,
        Register::RBX => Gp::RBX,
        Register::RSP => Gp::RSP,
        Register::RBP => Gp::RBP,
        Register::RSI => Gp::RSI,
        Register::RDI => Gp::RDI,
        Register::R8 => Gp::R8,
        Register::R9 => Gp::R9,
        Register::R10 => Gp::R10,
        Register::R11 => Gp::R11,
        Register::R12 => Gp::R12,
        Register::R13 => Gp::R13,
        Register::R14 => Gp::R14,
        Register::R15 => Gp::R15,
        _ => return None,
    };
    Some(RegisterIndex {
        extended_index,
        size,
    })
}
