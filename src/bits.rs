/// Return `x` with bit `bit` set if `on` is true, otherwise cleared.
pub fn with_bit(x: u32, bit: u32, on: bool) -> u32 {
    if on {
        x | (1 << bit)
    } else {
        x & !(1 << bit)
    }
}

/// Test whether bit `bit` of `x` is set.
pub fn test_bit(bit: u32, x: u32) -> bool {
    (x >> bit) & 1 == 1
}
