// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Flag kernel: EFLAGS computation for the emulated compare class.
//!
//! Two generic functions cover every width and operand order; the caller
//! picks the orientation by argument position (memory-as-left for the
//! source-pointer forms, memory-as-right for the destination-pointer forms).

use crate::defs::RFlags;

/// Updates the sign, zero, and parity flags.
fn update_flags_szp(flags: &mut RFlags, operand_size: usize, result: u64) {
    let op_shift = 64 - operand_size as u32 * 8;
    // Check if the low bits are zero.
    let zero = result.wrapping_shl(op_shift) == 0;
    // Extract the sign bit.
    let signed = (result.wrapping_shl(op_shift) as i64) < 0;
    // Cleverly count the number of ones (mod 2) in the low byte.
    let parity = (0x9669 >> ((result ^ (result >> 4)) & 0xf)) & 1 != 0;

    flags.set_parity(parity);
    flags.set_zero(zero);
    flags.set_sign(signed);
}

/// Computes the flags of `left - right` at the given operand size, as `CMP`
/// does: CF, OF, SF, ZF, AF, and PF.
pub(super) fn update_flags_cmp(flags: &mut RFlags, operand_size: usize, left: u64, right: u64) {
    let result = left.wrapping_sub(right);
    // Compute the carry bits of the computation.
    let carry_xor = left ^ right ^ result;
    // Compute the overflow bits of the computation.
    let overflow_xor = (left ^ result) & (left ^ right);
    let op_shift = 64 - operand_size as u32 * 8;
    // Extract the high overflow bit.
    let overflow = ((overflow_xor << op_shift) as i64) < 0;
    // Extract the fifth carry bit.
    let aux_carry = carry_xor & 0x10 != 0;
    // Compute the nth carry bit. For 64-bit values, this is gone, but it can
    // be recomputed as the (n-1)th carry bit ^ (n-1)th overflow bit.
    let carry = (((carry_xor ^ overflow_xor) << op_shift) as i64) < 0;

    update_flags_szp(flags, operand_size, result);
    flags.set_overflow(overflow);
    flags.set_adjust(aux_carry);
    flags.set_carry(carry);
}

/// Computes the flags of `left & right` at the given operand size, as `TEST`
/// does: SF, ZF, and PF from the result, CF and OF cleared, AF untouched.
pub(super) fn update_flags_test(flags: &mut RFlags, operand_size: usize, left: u64, right: u64) {
    update_flags_szp(flags, operand_size, left & right);
    flags.set_carry(false);
    flags.set_overflow(false);
}
