//! Byte-level codecs shared by felt-VM listeners and adapters.
//!
//! Felt VMs cannot carry opaque byte strings directly: `origin_data` is
//! transported as `[byte_length, word_count, word_0..word_n]` where each
//! word is a big-endian 16-byte chunk packed into a `u128`, and `u256`
//! values travel as a `(low, high)` pair of 128-bit halves. Both codecs
//! must round-trip exactly or destination status lookups will miss.

use alloy_primitives::U256;
use thiserror::Error;

/// Errors from felt-word encoding and decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
	/// The declared byte length does not match the supplied word count.
	#[error("byte length {byte_length} inconsistent with {word_count} words")]
	LengthMismatch { byte_length: u64, word_count: u64 },
}

/// Splits opaque bytes into big-endian 16-byte words.
///
/// Returns the original byte length alongside the packed words; a final
/// partial chunk is left-aligned (data in the high bytes) so decoding can
/// trim by length.
pub fn origin_data_to_words(data: &[u8]) -> (u64, Vec<u128>) {
	let mut words = Vec::with_capacity(data.len().div_ceil(16));
	for chunk in data.chunks(16) {
		let mut buf = [0u8; 16];
		buf[..chunk.len()].copy_from_slice(chunk);
		words.push(u128::from_be_bytes(buf));
	}
	(data.len() as u64, words)
}

/// Reassembles opaque bytes from big-endian 16-byte words.
pub fn words_to_origin_data(byte_length: u64, words: &[u128]) -> Result<Vec<u8>, CodecError> {
	let expected_words = (byte_length as usize).div_ceil(16);
	if expected_words != words.len() {
		return Err(CodecError::LengthMismatch {
			byte_length,
			word_count: words.len() as u64,
		});
	}
	let mut data = Vec::with_capacity(words.len() * 16);
	for word in words {
		data.extend_from_slice(&word.to_be_bytes());
	}
	data.truncate(byte_length as usize);
	Ok(data)
}

/// Splits a `U256` into `(low, high)` 128-bit halves.
pub fn u256_to_u128_pair(value: U256) -> (u128, u128) {
	let limbs = value.as_limbs();
	let low = (limbs[0] as u128) | ((limbs[1] as u128) << 64);
	let high = (limbs[2] as u128) | ((limbs[3] as u128) << 64);
	(low, high)
}

/// Rebuilds a `U256` from `(low, high)` 128-bit halves.
pub fn u128_pair_to_u256(low: u128, high: u128) -> U256 {
	(U256::from(high) << 128) | U256::from(low)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn origin_data_round_trips_unaligned_lengths() {
		for len in [0usize, 1, 15, 16, 17, 31, 32, 100] {
			let data: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
			let (byte_length, words) = origin_data_to_words(&data);
			assert_eq!(byte_length, len as u64);
			assert_eq!(words.len(), len.div_ceil(16));
			let back = words_to_origin_data(byte_length, &words).unwrap();
			assert_eq!(back, data);
		}
	}

	#[test]
	fn partial_chunk_is_left_aligned() {
		let (_, words) = origin_data_to_words(&[0xab]);
		assert_eq!(words, vec![0xab_u128 << 120]);
	}

	#[test]
	fn mismatched_word_count_is_rejected() {
		let err = words_to_origin_data(40, &[0, 0]).unwrap_err();
		assert_eq!(
			err,
			CodecError::LengthMismatch {
				byte_length: 40,
				word_count: 2
			}
		);
	}

	#[test]
	fn u256_halves_round_trip() {
		let value = U256::from_be_bytes([
			0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
			0x0f, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c,
			0x1d, 0x1e, 0x1f, 0x20,
		]);
		let (low, high) = u256_to_u128_pair(value);
		assert_eq!(u128_pair_to_u256(low, high), value);
		// The low half holds the least-significant bytes.
		assert_eq!(low & 0xff, 0x20);
	}
}
