/// Returns a `Box<[T; LEN]>` filled with `elem`.
#[inline(always)]
pub fn boxed_array<T: Clone, const LEN: usize>(elem: T) -> Box<[T; LEN]> {
    let Ok(array) = vec![elem; LEN].into_boxed_slice().try_into() else {
        unreachable!("boxed slice has exactly LEN elements")
    };

    array
}

/// Sign extends the low `bits` bits of `value` to a full `i32`.
#[inline(always)]
pub fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Sign extends a byte into a 16 bit word.
#[inline(always)]
pub fn sext8(value: u8) -> u16 {
    value as i8 as i16 as u16
}
