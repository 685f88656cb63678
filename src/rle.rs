//! Bounded run-length encoder for raster line bodies.
//!
//! The wire format packs a line as a sequence of runs.  A length byte
//! `n >= 0` is followed by `n + 1` literal bytes; a length byte `n < 0`
//! (two's complement) is followed by one byte repeated `1 - n` times.
//!
//! The encoder output for an `n`-byte line is never longer than
//! `n + n/128 + 1` bytes.  Two invariants of the run builder guarantee
//! this:
//!
//! 1. a repeated run always covers at least 3 input bytes, and
//! 2. two mixed runs never follow each other unless the first one is
//!    exactly 128 bytes long.
//!
//! Every repeated run is therefore at least one byte shorter than the
//! input it covers, so only a terminating mixed run or a full 128-byte
//! mixed run can cost the one extra length byte.

/// Longest input span one repeated run can cover.
const MAX_REPEAT: usize = 129;
/// Longest input span one mixed run can cover.
const MAX_MIXED: usize = 128;

/// Worst-case encoded size for `len` input bytes.
#[inline]
pub fn max_encoded_len(len: usize) -> usize {
    len + len / 128 + 1
}

fn append_repeat(out: &mut Vec<u8>, len: usize, value: u8) {
    debug_assert!((2..=MAX_REPEAT).contains(&len));
    out.push((1 - len as i32) as i8 as u8);
    out.push(value);
}

/// Appends one mixed run of at most [`MAX_MIXED`] bytes and returns how
/// many input bytes it consumed.
fn append_mixed(out: &mut Vec<u8>, bytes: &[u8]) -> usize {
    let len = bytes.len().min(MAX_MIXED);
    out.push((len - 1) as u8);
    out.extend_from_slice(&bytes[..len]);
    len
}

/// Encode `buf` as a run sequence appended to `out`; returns the body
/// length written.
///
/// The scan keeps a window `mix_start <= rep_start <= next` over the
/// input: `[mix_start, rep_start)` holds literals waiting to be written
/// as a mixed run, `[rep_start, next)` holds repeats of a single value.
pub fn encode_into(buf: &[u8], out: &mut Vec<u8>) -> usize {
    let start = out.len();
    if buf.is_empty() {
        return 0;
    }

    let mut mix_start = 0usize;
    let mut rep_start = 0usize;
    let mut rep_val = buf[0];

    for next in 0..buf.len() {
        let next_val = buf[next];
        if next - rep_start >= MAX_REPEAT {
            // A repeated run cannot cover more than 129 bytes.
            append_repeat(out, next - rep_start, rep_val);
            rep_start = next;
            rep_val = next_val;
            mix_start = rep_start;
        }
        if next_val == rep_val {
            if next - rep_start == 2 {
                // Third repeat seen: commit the pending literals so the
                // repeats become a run of their own.
                let mix_len = rep_start - mix_start;
                if mix_len > 0 {
                    mix_start += append_mixed(out, &buf[mix_start..rep_start]);
                }
            }
        } else {
            if next - rep_start > 2 {
                append_repeat(out, next - rep_start, rep_val);
                mix_start = next;
            }
            rep_start = next;
            rep_val = next_val;
            if rep_start - mix_start >= MAX_MIXED {
                mix_start += append_mixed(out, &buf[mix_start..rep_start]);
            }
        }
    }

    // Tail: pending repeats first, then up to two mixed runs (a 129-byte
    // literal tail does not fit in one).
    let end = buf.len();
    if end - rep_start > 2 {
        append_repeat(out, end - rep_start, rep_val);
        mix_start = end;
    }
    if end - mix_start > 0 {
        mix_start += append_mixed(out, &buf[mix_start..end]);
    }
    if end - mix_start > 0 {
        append_mixed(out, &buf[mix_start..end]);
    }
    out.len() - start
}

/// Expand an encoded body back into raw bytes, appending to `out`.
///
/// Used by the uncompressed/bit-image expansion paths and by the stream
/// decoder.  Returns `Err(offset)` pointing at the length byte of a run
/// that overruns the body.
pub fn unpack_into(body: &[u8], out: &mut Vec<u8>) -> Result<usize, usize> {
    let start = out.len();
    let mut i = 0usize;
    while i < body.len() {
        let n = body[i] as i8;
        if n < 0 {
            if i + 1 >= body.len() {
                return Err(i);
            }
            let count = 1 - n as i32;
            let value = body[i + 1];
            out.resize(out.len() + count as usize, value);
            i += 2;
        } else {
            let count = n as usize + 1;
            if i + 1 + count > body.len() {
                return Err(i);
            }
            out.extend_from_slice(&body[i + 1..i + 1 + count]);
            i += 1 + count;
        }
    }
    Ok(out.len() - start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(buf: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_into(buf, &mut out);
        out
    }

    fn roundtrip(buf: &[u8]) {
        let body = encode(buf);
        assert!(
            body.len() <= max_encoded_len(buf.len()),
            "{} bytes encoded to {} > bound {}",
            buf.len(),
            body.len(),
            max_encoded_len(buf.len())
        );
        let mut back = Vec::new();
        unpack_into(&body, &mut back).unwrap();
        assert_eq!(back, buf);
    }

    #[test]
    fn empty_input_yields_empty_body() {
        assert_eq!(encode(&[]), Vec::<u8>::new());
    }

    #[test]
    fn single_byte_is_one_literal() {
        assert_eq!(encode(&[0x42]), vec![0x00, 0x42]);
    }

    #[test]
    fn three_repeats_become_a_run() {
        assert_eq!(encode(&[7, 7, 7]), vec![(-2i8) as u8, 7]);
    }

    #[test]
    fn two_repeats_stay_literal() {
        assert_eq!(encode(&[7, 7]), vec![0x01, 7, 7]);
    }

    #[test]
    fn repeats_inside_literals_flush_the_pending_mix() {
        // 1 2 3 3 3: the third 3 forces [1, 2] out as a mixed run.
        assert_eq!(encode(&[1, 2, 3, 3, 3]), vec![0x01, 1, 2, (-2i8) as u8, 3]);
    }

    #[test]
    fn run_of_129_fits_in_one_repeat() {
        let body = encode(&[0xAA; 129]);
        assert_eq!(body, vec![0x80, 0xAA]); // 1 - 129 == -128
    }

    #[test]
    fn run_of_130_splits_at_the_cap() {
        let body = encode(&[0xAA; 130]);
        // 129 repeats, then a single literal.
        assert_eq!(body, vec![0x80, 0xAA, 0x00, 0xAA]);
    }

    #[test]
    fn alternating_256_bytes_meet_the_bound_exactly() {
        let buf: Vec<u8> = (0..256)
            .map(|i| if i % 2 == 0 { 0xAA } else { 0xBB })
            .collect();
        let body = encode(&buf);
        assert_eq!(body.len(), 258);
        assert_eq!(body[0], 0x7F);
        assert_eq!(body[129], 0x7F);
        let mut back = Vec::new();
        unpack_into(&body, &mut back).unwrap();
        assert_eq!(back, buf);
    }

    #[test]
    fn mixed_tail_of_129_needs_two_runs() {
        // 127 distinct literals followed by a pair leave 129 pending
        // mixed bytes when the scan ends; the tail must emit twice.
        let mut buf: Vec<u8> = (0..127).collect();
        buf.extend([0xF0, 0xF0]);
        let body = encode(&buf);
        assert_eq!(body.len(), 131); // 1 + 128 + 1 + 1
        assert_eq!(body[0], 127);
        assert_eq!(body[129], 0);
        assert_eq!(body[130], 0xF0);
        let mut back = Vec::new();
        unpack_into(&body, &mut back).unwrap();
        assert_eq!(back, buf);
    }

    #[test]
    fn bound_holds_for_assorted_patterns() {
        let mut patterns: Vec<Vec<u8>> = vec![
            vec![0; 90],
            vec![0xFF; 90],
            (0..=255).collect(),
            (0..255).map(|i| i / 3).collect(),
        ];
        // Pseudo-random mix without an RNG dependency.
        let mut x: u32 = 0x2545_f491;
        patterns.push(
            (0..1024)
                .map(|_| {
                    x ^= x << 13;
                    x ^= x >> 17;
                    x ^= x << 5;
                    (x & 0xFF) as u8
                })
                .collect(),
        );
        for p in patterns {
            roundtrip(&p);
        }
    }

    #[test]
    fn unpack_rejects_overrunning_runs() {
        let mut out = Vec::new();
        assert_eq!(unpack_into(&[(-3i8) as u8], &mut out), Err(0));
        assert_eq!(unpack_into(&[0x05, 1, 2], &mut out), Err(0));
    }
}
