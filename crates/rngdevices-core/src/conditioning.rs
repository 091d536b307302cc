//! Simple conditioning applied to raw device output.
//!
//! Only XOR folding lives here. Sources that condition their output call
//! into this module rather than carrying their own whitening code.

/// XOR-fold: reduce data by XORing the first half with the second half.
///
/// Odd-length input drops its final byte.
pub fn xor_fold(data: &[u8]) -> Vec<u8> {
    if data.len() < 2 {
        return data.to_vec();
    }
    let half = data.len() / 2;
    (0..half).map(|i| data[i] ^ data[half + i]).collect()
}

/// Apply [`xor_fold`] `folds` times.
///
/// `data.len()` should be `n << folds` for an `n`-byte result.
pub fn fold(data: &[u8], folds: u32) -> Vec<u8> {
    let mut out = data.to_vec();
    for _ in 0..folds {
        out = xor_fold(&out);
    }
    out
}

/// Raw byte count needed to produce `n_output` bytes after `folds` folds.
pub fn folded_input_len(n_output: usize, folds: u32) -> Option<usize> {
    n_output.checked_mul(1usize.checked_shl(folds)?)
}
