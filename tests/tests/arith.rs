// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::common::TestBed;
use crate::common::GUEST_BASE;
use crate::common::RFLAGS_ARITH_MASK;
use crate::common::RFLAGS_LOGIC_MASK;
use iced_x86::code_asm::*;
use kemu::defs::RFlags;
use kemu::Gp;

fn bed_with_dword(mem: u32, rax_val: u64) -> TestBed {
    let mut bed = TestBed::new();
    bed.set_mem(0x10, &mem.to_le_bytes());
    bed.ctx.set_gp64(Gp::RAX, rax_val);
    bed.ctx.set_gp64(Gp::RSI, GUEST_BASE + 0x10);
    bed
}

#[test]
fn or_memory_to_reg32_zero_extends() {
    let mut bed = bed_with_dword(0x00FF00FF, 0xFFFFFFFF_0F0F0F0F);
    bed.assemble(|asm| asm.or(eax, dword_ptr(rsi)));

    bed.read(GUEST_BASE + 0x10).unwrap();

    assert_eq!(bed.ctx.gp64(Gp::RAX), 0x0FFF0FFF);
}

#[test]
fn xor_memory_to_reg64() {
    let mut bed = TestBed::new();
    bed.set_mem(0x10, &0xFFFFFFFFFFFFFFFFu64.to_le_bytes());
    bed.ctx.set_gp64(Gp::RAX, 0x0123456789ABCDEF);
    bed.ctx.set_gp64(Gp::RSI, GUEST_BASE + 0x10);
    bed.assemble(|asm| asm.xor(rax, qword_ptr(rsi)));

    bed.read(GUEST_BASE + 0x10).unwrap();

    assert_eq!(bed.ctx.gp64(Gp::RAX), !0x0123456789ABCDEF);
}

#[test]
fn and_memory_to_reg16_preserves_parent() {
    let mut bed = bed_with_dword(0x0000F00F, 0xDEADBEEFCAFEBABE);
    bed.assemble(|asm| asm.and(ax, word_ptr(rsi)));

    bed.read(GUEST_BASE + 0x10).unwrap();

    assert_eq!(bed.ctx.gp64(Gp::RAX), 0xDEADBEEFCAFEB00E);
}

#[test]
fn add_memory_to_reg8_high() {
    let mut bed = bed_with_dword(0x00000002, 0xDEADBEEFCAFEFFBE);
    bed.assemble(|asm| asm.add(ah, byte_ptr(rsi)));

    bed.read(GUEST_BASE + 0x10).unwrap();

    // The byte add wraps without carrying into bits [23:16].
    assert_eq!(bed.ctx.gp64(Gp::RAX), 0xDEADBEEFCAFE01BE);
}

#[test]
fn sub_memory_to_reg32() {
    let mut bed = bed_with_dword(0x00000001, 0xFFFFFFFF_00000000);
    bed.assemble(|asm| asm.sub(eax, dword_ptr(rsi)));

    bed.read(GUEST_BASE + 0x10).unwrap();

    // The 32-bit borrow wraps within the low half; the parent zero extends.
    assert_eq!(bed.ctx.gp64(Gp::RAX), 0xFFFFFFFF);
}

#[test]
fn add_memory_to_reg64() {
    let mut bed = TestBed::new();
    bed.set_mem(0x10, &2u64.to_le_bytes());
    bed.ctx.set_gp64(Gp::RAX, 0xFFFFFFFFFFFFFFFF);
    bed.ctx.set_gp64(Gp::RSI, GUEST_BASE + 0x10);
    bed.assemble(|asm| asm.add(rax, qword_ptr(rsi)));

    bed.read(GUEST_BASE + 0x10).unwrap();

    assert_eq!(bed.ctx.gp64(Gp::RAX), 1);
}

#[test]
fn cmp_memory_to_regvalue() {
    // (memory, register, expected flags), captured from hardware.
    let variations = [
        (0x0, 0x0, 0x44),
        (0x64, 0x64, 0x44),
        (0x1, 0x0, 0x0),
        (0x0, 0x1, 0x95),
        (0xFFFFFFFF, 0xFFFFFFFF, 0x44),
        (0x0, 0x7FFFFFFF, 0x91),
        (0x7FFFFFFF, 0x80000000, 0x885),
    ];

    for &(left, right, rflags) in &variations {
        let mut bed = bed_with_dword(left, right);
        bed.assemble(|asm| asm.cmp(dword_ptr(rsi), eax));

        bed.read(GUEST_BASE + 0x10).unwrap();

        assert_eq!(
            bed.ctx.rflags & RFLAGS_ARITH_MASK,
            RFlags::from(rflags),
            "cmp [mem]={left:#x}, reg={right:#x}"
        );
    }
}

#[test]
fn cmp_regvalue_to_memory() {
    let variations = [
        (0x0, 0x0, 0x44),
        (0x1, 0x0, 0x0),
        (0x0, 0x1, 0x95),
        (0x80000000, 0x7FFFFFFF, 0x810),
        (0x7FFFFFFF, 0x80000000, 0x885),
        (0x0, 0x7FFFFFFF, 0x91),
    ];

    for &(left, right, rflags) in &variations {
        let mut bed = bed_with_dword(right, left);
        bed.assemble(|asm| asm.cmp(eax, dword_ptr(rsi)));

        bed.read(GUEST_BASE + 0x10).unwrap();

        assert_eq!(
            bed.ctx.rflags & RFLAGS_ARITH_MASK,
            RFlags::from(rflags),
            "cmp reg={left:#x}, [mem]={right:#x}"
        );
    }
}

#[test]
fn cmp_regvalue_to_memory64() {
    let variations: [(u64, u64, u64); 6] = [
        (0x0, 0x0, 0x44),
        (0xFFFFFFFFFFFFFFFF, 0x0, 0x84),
        (0x8000000000000000, 0x7FFFFFFF, 0x810),
        (0x7FFFFFFF, 0x8000000000000000, 0x885),
        (0x8000000000000000, 0x8000000000000000, 0x44),
        (0x7FFFFFFFFFFFFFFF, 0x7FFFFFFFFFFFFFFF, 0x44),
    ];

    for &(left, right, rflags) in &variations {
        let mut bed = TestBed::new();
        bed.set_mem(0x10, &right.to_le_bytes());
        bed.ctx.set_gp64(Gp::RAX, left);
        bed.ctx.set_gp64(Gp::RSI, GUEST_BASE + 0x10);
        bed.assemble(|asm| asm.cmp(rax, qword_ptr(rsi)));

        bed.read(GUEST_BASE + 0x10).unwrap();

        assert_eq!(
            bed.ctx.rflags & RFLAGS_ARITH_MASK,
            RFlags::from(rflags),
            "cmp reg={left:#x}, [mem]={right:#x}"
        );
    }
}

#[test]
fn cmp_memory_to_regvalue_byte() {
    let variations = [
        (0x0u8, 0x0u64, 0x44u64),
        (0x0, 0x1, 0x95),
        (0x1, 0x0, 0x0),
        (0xFF, 0x0, 0x84),
        (0x80, 0x7F, 0x810),
        (0x7F, 0x80, 0x885),
    ];

    for &(left, right, rflags) in &variations {
        let mut bed = TestBed::new();
        bed.set_mem(0x10, &[left]);
        bed.ctx.set_gp64(Gp::RAX, right);
        bed.ctx.set_gp64(Gp::RSI, GUEST_BASE + 0x10);
        bed.assemble(|asm| asm.cmp(byte_ptr(rsi), al));

        bed.read(GUEST_BASE + 0x10).unwrap();

        assert_eq!(
            bed.ctx.rflags & RFLAGS_ARITH_MASK,
            RFlags::from(rflags),
            "cmp [mem]={left:#x}, al={right:#x}"
        );
    }
}

#[test]
fn cmp_memory_to_immediate() {
    let variations = [
        (0x0u32, 0x0u32, 0x44u64),
        (0x1, 0x0, 0x0),
        (0x0, 0xFFFFFFFF, 0x11),
        (0x0, 0xFFFFFF80, 0x1),
        (0x7F, 0x7F, 0x44),
        (0x7F, 0xFFFFFF80, 0x5),
    ];

    for &(left, right, rflags) in &variations {
        let mut bed = bed_with_dword(left, 0);
        bed.ctx.set_gp64(Gp::RSI, GUEST_BASE + 0x10);
        bed.assemble(|asm| asm.cmp(dword_ptr(rsi), right));

        bed.read(GUEST_BASE + 0x10).unwrap();

        assert_eq!(
            bed.ctx.rflags & RFLAGS_ARITH_MASK,
            RFlags::from(rflags),
            "cmp [mem]={left:#x}, imm={right:#x}"
        );
    }
}

#[test]
fn test_memory_to_regvalue() {
    let mut bed = bed_with_dword(0x44332211, 0x44332211);
    bed.ctx.rflags = bed.ctx.rflags.with_carry(true).with_overflow(true);
    bed.assemble(|asm| asm.test(dword_ptr(rsi), eax));

    bed.read(GUEST_BASE + 0x10).unwrap();

    // A nonzero result: SF/ZF/CF/OF all clear, PF from the low byte (0x11
    // has two bits set).
    assert_eq!(
        bed.ctx.rflags & RFLAGS_LOGIC_MASK,
        RFlags::new().with_parity(true)
    );
    assert!(bed.ctx.rflags.resume());
}

#[test]
fn test_sets_zero_flag() {
    let mut bed = bed_with_dword(0xF0F0F0F0, 0x0F0F0F0F);
    bed.assemble(|asm| asm.test(dword_ptr(rsi), eax));

    bed.read(GUEST_BASE + 0x10).unwrap();

    assert!(bed.ctx.rflags.zero());
    assert!(bed.ctx.rflags.parity());
    assert!(!bed.ctx.rflags.carry());
    assert!(bed.ctx.rflags.resume());
}

#[test]
fn test_memory_to_immediate() {
    let mut bed = bed_with_dword(0x80000000, 0);
    bed.assemble(|asm| asm.test(dword_ptr(rsi), 0x80000000u32));

    bed.read(GUEST_BASE + 0x10).unwrap();

    assert!(bed.ctx.rflags.sign());
    assert!(!bed.ctx.rflags.zero());
    assert!(bed.ctx.rflags.resume());
}

#[test]
fn cmp_does_not_write_registers_or_memory() {
    let mut bed = bed_with_dword(0x1234, 0x5678);
    bed.assemble(|asm| asm.cmp(dword_ptr(rsi), eax));
    let gps = bed.ctx.gps;

    bed.read(GUEST_BASE + 0x10).unwrap();

    assert_eq!(bed.ctx.gps, gps);
    assert_eq!(bed.mem(0x10, 4), &0x1234u32.to_le_bytes());
}
