//! Canonical RIFF/WAVE container header: mono, 24 kHz, 16-bit PCM.
//!
//! Unlike the reference project's streaming WAV header — which writes
//! `u32::MAX` size placeholders because the stream is conceptually
//! infinite — the recorder's container is a finite file. The header is
//! reserved as zeroed bytes when the file is opened, and this module
//! builds the real header once the final byte count is known, to be
//! written back over the placeholder at offset 0 when the recorder closes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol_constants::{AI_SAMPLE_RATE, WAV_BITS_PER_SAMPLE, WAV_CHANNELS, WAV_HEADER_BYTES};

/// A zeroed 44-byte placeholder, written at file-open time before the
/// real `data_size` is known.
pub fn reserved_header() -> [u8; WAV_HEADER_BYTES] {
    [0u8; WAV_HEADER_BYTES]
}

/// Builds the real 44-byte header for `data_size` bytes of PCM payload,
/// to be patched in at offset 0 when the recorder closes.
pub fn canonical_header(data_size: u32) -> Bytes {
    let bytes_per_sample = WAV_BITS_PER_SAMPLE / 8;
    let byte_rate = AI_SAMPLE_RATE * WAV_CHANNELS as u32 * bytes_per_sample as u32;
    let block_align = WAV_CHANNELS * bytes_per_sample;
    let riff_size = data_size + (WAV_HEADER_BYTES as u32 - 8);

    let mut header = BytesMut::with_capacity(WAV_HEADER_BYTES);
    header.put_slice(b"RIFF");
    header.put_u32_le(riff_size);
    header.put_slice(b"WAVE");

    header.put_slice(b"fmt ");
    header.put_u32_le(16);
    header.put_u16_le(1); // PCM
    header.put_u16_le(WAV_CHANNELS);
    header.put_u32_le(AI_SAMPLE_RATE);
    header.put_u32_le(byte_rate);
    header.put_u16_le(block_align);
    header.put_u16_le(WAV_BITS_PER_SAMPLE);

    header.put_slice(b"data");
    header.put_u32_le(data_size);

    header.freeze()
}

/// Serializes a slab of PCM16 samples to little-endian bytes, ready to be
/// appended to the recording file after the header.
pub fn samples_to_bytes(samples: &[i16]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        out.put_i16_le(s);
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_header_is_44_zero_bytes() {
        let header = reserved_header();
        assert_eq!(header.len(), WAV_HEADER_BYTES);
        assert!(header.iter().all(|&b| b == 0));
    }

    #[test]
    fn canonical_header_data_size_field_matches_file_size_minus_44() {
        let data_size = 48_000u32;
        let header = canonical_header(data_size);
        assert_eq!(header.len(), WAV_HEADER_BYTES);

        let file_size = WAV_HEADER_BYTES as u32 + data_size;
        let riff_size = u32::from_le_bytes(header[4..8].try_into().unwrap());
        assert_eq!(riff_size, file_size - 8);

        let header_data_size = u32::from_le_bytes(header[40..44].try_into().unwrap());
        assert_eq!(header_data_size, data_size);
        assert_eq!(header_data_size, file_size - WAV_HEADER_BYTES as u32);
    }

    #[test]
    fn canonical_header_fixed_fields_match_contract() {
        let header = canonical_header(0);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(u16::from_le_bytes(header[20..22].try_into().unwrap()), 1); // PCM
        assert_eq!(u16::from_le_bytes(header[22..24].try_into().unwrap()), WAV_CHANNELS);
        assert_eq!(u32::from_le_bytes(header[24..28].try_into().unwrap()), AI_SAMPLE_RATE);
        assert_eq!(u16::from_le_bytes(header[34..36].try_into().unwrap()), WAV_BITS_PER_SAMPLE);
        assert_eq!(&header[36..40], b"data");
    }

    #[test]
    fn samples_to_bytes_round_trips_little_endian() {
        let samples = vec![1i16, -1, 32767, -32768];
        let bytes = samples_to_bytes(&samples);
        let decoded: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(decoded, samples);
    }
}
