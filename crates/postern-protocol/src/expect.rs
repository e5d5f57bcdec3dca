//! Timed instruction reads
//!
//! The handshake contract requires reading exactly one instruction within a
//! bounded timeout. These helpers wrap a framed transport accordingly.

use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::codec::InstructionCodec;
use crate::error::ProtocolError;
use crate::instruction::Instruction;

/// Read one instruction, failing if none arrives within `timeout`
pub async fn read_instruction<T>(
    framed: &mut FramedRead<T, InstructionCodec>,
    timeout: Duration,
) -> Result<Instruction, ProtocolError>
where
    T: AsyncRead + Unpin,
{
    match tokio::time::timeout(timeout, framed.next()).await {
        Err(_) => Err(ProtocolError::Timeout),
        Ok(None) => Err(ProtocolError::UnexpectedEof),
        Ok(Some(result)) => result,
    }
}

/// Read one instruction and require a specific opcode
pub async fn expect_instruction<T>(
    framed: &mut FramedRead<T, InstructionCodec>,
    timeout: Duration,
    opcode: &str,
) -> Result<Instruction, ProtocolError>
where
    T: AsyncRead + Unpin,
{
    let instruction = read_instruction(framed, timeout).await?;
    if instruction.opcode != opcode {
        return Err(ProtocolError::UnexpectedOpcode {
            expected: opcode.to_string(),
            actual: instruction.opcode,
        });
    }
    Ok(instruction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_expect_instruction_success() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut framed = FramedRead::new(server, InstructionCodec::new());

        client.write_all(b"6.select,3.vnc;").await.unwrap();

        let instruction = expect_instruction(&mut framed, Duration::from_secs(1), "select")
            .await
            .unwrap();
        assert_eq!(instruction.opcode, "select");
        assert_eq!(instruction.arg(0), Some("vnc"));
    }

    #[tokio::test]
    async fn test_expect_instruction_wrong_opcode() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut framed = FramedRead::new(server, InstructionCodec::new());

        client.write_all(b"4.sync,1.0;").await.unwrap();

        let result = expect_instruction(&mut framed, Duration::from_secs(1), "select").await;
        assert!(matches!(
            result,
            Err(ProtocolError::UnexpectedOpcode { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_instruction_timeout() {
        let (_client, server) = tokio::io::duplex(256);
        let mut framed = FramedRead::new(server, InstructionCodec::new());

        let result = read_instruction(&mut framed, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_read_instruction_eof() {
        let (client, server) = tokio::io::duplex(256);
        let mut framed = FramedRead::new(server, InstructionCodec::new());
        drop(client);

        let result = read_instruction(&mut framed, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProtocolError::UnexpectedEof)));
    }
}
