use std::io::{self, Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

pub fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Fails unless the stream inflates to exactly `expected_len` bytes.
pub fn decompress_exact(data: &[u8], expected_len: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len);
    ZlibDecoder::new(data)
        .take(expected_len as u64 + 1)
        .read_to_end(&mut out)?;

    if out.len() != expected_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Inflated to {} bytes, expected {}",
                out.len(),
                expected_len
            ),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_length_is_rejected() {
        let packed = compress(&[7u8; 100]).unwrap();
        assert_eq!(decompress_exact(&packed, 100).unwrap(), vec![7u8; 100]);
        assert!(decompress_exact(&packed, 99).is_err());
        assert!(decompress_exact(&packed, 101).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decompress_exact(&[1, 2, 3, 4], 4).is_err());
    }
}
