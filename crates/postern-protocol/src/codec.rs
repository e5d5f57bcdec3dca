//! Tokio codec for the instruction wire format
//!
//! Each element of an instruction is transmitted as `LENGTH.VALUE`, where
//! LENGTH is the number of characters (not bytes) in VALUE. Elements are
//! separated by `,` and the instruction is terminated by `;`. The first
//! element is the opcode, all remaining elements are arguments:
//!
//! ```text
//! 6.select,3.vnc;
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::instruction::Instruction;

/// Maximum size of a single encoded instruction in bytes
pub const MAX_INSTRUCTION_SIZE: usize = 32768;

/// Codec for encoding/decoding protocol instructions
#[derive(Debug, Default)]
pub struct InstructionCodec;

impl InstructionCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self
    }
}

/// Returns the byte span of `count` characters at the start of `buf`, or
/// `None` if the buffer does not yet hold that many characters.
fn span_of_chars(buf: &[u8], count: usize) -> Result<Option<usize>, ProtocolError> {
    let valid = match std::str::from_utf8(buf) {
        Ok(s) => s,
        // A truncated trailing sequence is not an error, just short data
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&buf[..e.valid_up_to()])
            .map_err(|_| ProtocolError::InvalidUtf8)?,
        Err(_) => return Err(ProtocolError::InvalidUtf8),
    };

    let mut end = 0usize;
    let mut remaining = count;
    for ch in valid.chars() {
        if remaining == 0 {
            break;
        }
        remaining -= 1;
        end += ch.len_utf8();
    }

    if remaining == 0 {
        Ok(Some(end))
    } else {
        Ok(None)
    }
}

/// Result for a partial instruction: more data is needed, unless the buffer
/// has already outgrown the instruction size limit.
fn incomplete(src: &BytesMut) -> Result<Option<Instruction>, ProtocolError> {
    if src.len() > MAX_INSTRUCTION_SIZE {
        return Err(ProtocolError::InstructionTooLarge {
            size: src.len(),
            max: MAX_INSTRUCTION_SIZE,
        });
    }
    Ok(None)
}

impl Decoder for InstructionCodec {
    type Item = Instruction;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut pos = 0usize;
        let mut elements: Vec<String> = Vec::new();

        loop {
            // Decimal length prefix
            let mut length = 0usize;
            let mut digits = 0usize;
            let value_start;
            loop {
                let Some(&byte) = src.get(pos) else {
                    return incomplete(src);
                };
                match byte {
                    b'0'..=b'9' => {
                        length = length * 10 + (byte - b'0') as usize;
                        digits += 1;
                        pos += 1;
                        if length > MAX_INSTRUCTION_SIZE {
                            return Err(ProtocolError::InstructionTooLarge {
                                size: length,
                                max: MAX_INSTRUCTION_SIZE,
                            });
                        }
                    }
                    b'.' if digits > 0 => {
                        pos += 1;
                        value_start = pos;
                        break;
                    }
                    _ => return Err(ProtocolError::InvalidLengthPrefix),
                }
            }

            // Value: exactly `length` characters
            let Some(span) = span_of_chars(&src[value_start..], length)? else {
                return incomplete(src);
            };
            let value = std::str::from_utf8(&src[value_start..value_start + span])
                .map_err(|_| ProtocolError::InvalidUtf8)?
                .to_string();
            pos = value_start + span;

            // Element terminator: ',' continues the instruction, ';' ends it
            let Some(&byte) = src.get(pos) else {
                return incomplete(src);
            };
            pos += 1;
            elements.push(value);
            match byte {
                b',' => continue,
                b';' => break,
                _ => return Err(ProtocolError::UnexpectedByte { byte }),
            }
        }

        let _ = src.split_to(pos);

        let mut elements = elements.into_iter();
        let opcode = elements.next().unwrap_or_default();
        Ok(Some(Instruction::new(opcode, elements.collect())))
    }
}

impl Encoder<Instruction> for InstructionCodec {
    type Error = ProtocolError;

    fn encode(&mut self, instruction: Instruction, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut encoded = String::new();
        write_element(&mut encoded, &instruction.opcode);
        for arg in &instruction.args {
            encoded.push(',');
            write_element(&mut encoded, arg);
        }
        encoded.push(';');

        if encoded.len() > MAX_INSTRUCTION_SIZE {
            return Err(ProtocolError::InstructionTooLarge {
                size: encoded.len(),
                max: MAX_INSTRUCTION_SIZE,
            });
        }

        dst.extend_from_slice(encoded.as_bytes());
        Ok(())
    }
}

fn write_element(out: &mut String, value: &str) {
    out.push_str(&value.chars().count().to_string());
    out.push('.');
    out.push_str(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(input: &str) -> Instruction {
        let mut codec = InstructionCodec::new();
        let mut buf = BytesMut::from(input.as_bytes());
        codec.decode(&mut buf).unwrap().expect("complete instruction")
    }

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = InstructionCodec::new();

        let instruction = Instruction::new(
            "select",
            vec!["vnc".to_string()],
        );

        let mut buf = BytesMut::new();
        codec.encode(instruction.clone(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"6.select,3.vnc;");

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, instruction);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_no_args() {
        let decoded = decode_one("10.disconnect;");
        assert_eq!(decoded.opcode, "disconnect");
        assert!(decoded.args.is_empty());
    }

    #[test]
    fn test_decode_multiple_instructions() {
        let mut codec = InstructionCodec::new();
        let mut buf = BytesMut::from(&b"4.sync,8.12345678;3.key,2.65,1.1;"[..]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.opcode, "sync");
        assert_eq!(first.arg(0), Some("12345678"));

        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.opcode, "key");
        assert_eq!(second.args, vec!["65", "1"]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = InstructionCodec::new();
        let full = b"6.select,3.vnc;";

        // Feed the instruction one byte at a time; only the final byte
        // completes it
        let mut buf = BytesMut::new();
        for (i, byte) in full.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            let result = codec.decode(&mut buf).unwrap();
            if i < full.len() - 1 {
                assert!(result.is_none(), "completed early at byte {}", i);
            } else {
                assert_eq!(result.unwrap().opcode, "select");
            }
        }
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // "héllo" is 5 characters but 6 bytes
        let mut codec = InstructionCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Instruction::new("clipboard", vec!["héllo".to_string()]),
                &mut buf,
            )
            .unwrap();
        assert_eq!(&buf[..], "9.clipboard,5.héllo;".as_bytes());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.arg(0), Some("héllo"));
    }

    #[test]
    fn test_split_multibyte_character() {
        let mut codec = InstructionCodec::new();
        let encoded = "9.clipboard,5.héllo;".as_bytes();

        // Split in the middle of the two-byte 'é'
        let split_at = encoded.iter().position(|&b| b == b'h').unwrap() + 2;
        let mut buf = BytesMut::from(&encoded[..split_at]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[split_at..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.arg(0), Some("héllo"));
    }

    #[test]
    fn test_invalid_length_prefix() {
        let mut codec = InstructionCodec::new();
        let mut buf = BytesMut::from(&b"x.select;"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::InvalidLengthPrefix)
        ));
    }

    #[test]
    fn test_unexpected_terminator() {
        let mut codec = InstructionCodec::new();
        let mut buf = BytesMut::from(&b"6.select|3.vnc;"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::UnexpectedByte { byte: b'|' })
        ));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut codec = InstructionCodec::new();
        let mut buf = BytesMut::from(&b"99999999.x;"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::InstructionTooLarge { .. })
        ));
    }

    #[test]
    fn test_unterminated_buffer_rejected_at_limit() {
        let mut codec = InstructionCodec::new();

        // A buffer that never terminates must not grow without bound
        let mut buf = BytesMut::new();
        buf.extend_from_slice(format!("{}.", MAX_INSTRUCTION_SIZE).as_bytes());
        buf.extend_from_slice(&vec![b'a'; MAX_INSTRUCTION_SIZE]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::InstructionTooLarge { .. })
        ));
    }
}
