//! WAV stream assembly for the file sink.
//!
//! Synthesis providers return one complete WAV per chunk; the file sink
//! appends them into a single contiguous stream. All appended chunks must
//! share the same fmt header (sample rate/channels/bit depth).

use anyhow::{anyhow, Result};

struct ParsedWav {
    fmt: Vec<u8>,
    data_start: usize,
    data_len: usize,
}

fn parse_wav(bytes: &[u8]) -> Result<ParsedWav> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(anyhow!("not a RIFF/WAVE stream"));
    }

    let mut fmt: Option<Vec<u8>> = None;
    let mut pos = 12usize;

    while pos + 8 <= bytes.len() {
        let chunk_id = &bytes[pos..pos + 4];
        let chunk_size = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]) as usize;
        let body = pos + 8;

        if chunk_id == b"fmt " {
            if body + chunk_size > bytes.len() {
                return Err(anyhow!("truncated fmt chunk"));
            }
            fmt = Some(bytes[body..body + chunk_size].to_vec());
        } else if chunk_id == b"data" {
            let data_len = chunk_size.min(bytes.len().saturating_sub(body));
            return Ok(ParsedWav {
                fmt: fmt.ok_or_else(|| anyhow!("data chunk precedes fmt chunk"))?,
                data_start: body,
                data_len,
            });
        }

        // Chunks are word-aligned.
        pos = body + chunk_size + (chunk_size & 1);
    }

    Err(anyhow!("missing data chunk"))
}

/// Accumulates WAV chunks into one stream, written out once at the end.
#[derive(Default)]
pub struct WavAssembler {
    fmt: Option<Vec<u8>>,
    data: Vec<u8>,
}

impl WavAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends one complete WAV chunk. The first chunk fixes the stream
    /// format; later chunks must match it.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let parsed = parse_wav(bytes)?;
        match &self.fmt {
            None => self.fmt = Some(parsed.fmt),
            Some(fmt) if *fmt != parsed.fmt => {
                return Err(anyhow!(
                    "WAV format mismatch; all segments must share sample rate and channels"
                ));
            }
            Some(_) => {}
        }
        self.data
            .extend_from_slice(&bytes[parsed.data_start..parsed.data_start + parsed.data_len]);
        Ok(())
    }

    /// Builds the final WAV file contents.
    pub fn finish(&self) -> Result<Vec<u8>> {
        let fmt = self
            .fmt
            .as_ref()
            .ok_or_else(|| anyhow!("no audio was appended"))?;

        let data_len = u32::try_from(self.data.len())
            .map_err(|_| anyhow!("assembled audio exceeds the WAV size limit"))?;
        let riff_len = 4 + 8 + fmt.len() as u32 + 8 + data_len;

        let mut out = Vec::with_capacity(self.data.len() + fmt.len() + 44);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&riff_len.to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&(fmt.len() as u32).to_le_bytes());
        out.extend_from_slice(fmt);
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.extend_from_slice(&self.data);
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) fn dummy_wav(data_size: u32, sample_rate: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_size).to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes());

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    buf.extend_from_slice(&vec![0u8; data_size as usize]);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_compatible_chunks() -> Result<()> {
        let mut assembler = WavAssembler::new();
        assembler.append(&dummy_wav(10, 44100))?;
        assembler.append(&dummy_wav(20, 44100))?;

        let out = assembler.finish()?;
        let parsed = parse_wav(&out)?;
        assert_eq!(parsed.data_len, 30);
        assert_eq!(parsed.fmt.len(), 16);
        Ok(())
    }

    #[test]
    fn rejects_format_mismatch() {
        let mut assembler = WavAssembler::new();
        assembler.append(&dummy_wav(10, 44100)).unwrap();
        assert!(assembler.append(&dummy_wav(10, 22050)).is_err());
    }

    #[test]
    fn rejects_garbage() {
        let mut assembler = WavAssembler::new();
        assert!(assembler.append(b"definitely not audio").is_err());
        assert!(assembler.is_empty());
    }

    #[test]
    fn finish_without_audio_fails() {
        assert!(WavAssembler::new().finish().is_err());
    }
}
