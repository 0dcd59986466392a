//! Binary hunk decoding: base85 + zlib inflate, then literal or packfile-delta
//! reconstruction.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::ApplyError;
use crate::model::BinaryMethod;

/// Inflate `data` with zlib and require the result to be exactly
/// `expected_len` bytes, per the hunk header's declared original length.
pub fn inflate_exact(data: &[u8], expected_len: usize) -> Result<Vec<u8>, ApplyError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(expected_len);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ApplyError::Other(format!("zlib inflate failed: {e}")))?;
    if out.len() != expected_len {
        return Err(ApplyError::MalformedBinaryHunk {
            line: 0,
            reason: format!(
                "inflated length {} does not match declared length {expected_len}",
                out.len()
            ),
        });
    }
    Ok(out)
}

/// Reconstruct the postimage bytes from a decoded binary hunk given the
/// preimage. `literal` hunks carry the postimage directly (already
/// inflated); `delta` hunks carry a packfile-style delta against `preimage`,
/// reusing the same instruction format object deltas use.
pub fn reconstruct(
    method: BinaryMethod,
    preimage: &[u8],
    inflated: &[u8],
) -> Result<Vec<u8>, ApplyError> {
    match method {
        BinaryMethod::Literal => Ok(inflated.to_vec()),
        BinaryMethod::Delta => {
            git_pack::delta::apply::apply_delta(preimage, inflated).map_err(ApplyError::from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn inflate_round_trips() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"hello world").unwrap();
        let compressed = enc.finish().unwrap();
        let out = inflate_exact(&compressed, 11).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn inflate_rejects_length_mismatch() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"hello world").unwrap();
        let compressed = enc.finish().unwrap();
        assert!(inflate_exact(&compressed, 5).is_err());
    }

    #[test]
    fn literal_reconstruction_ignores_preimage() {
        let out = reconstruct(BinaryMethod::Literal, b"old", b"new").unwrap();
        assert_eq!(out, b"new");
    }
}
