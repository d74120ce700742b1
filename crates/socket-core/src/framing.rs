//! Length-delimited frame encoding over raw tokio I/O.
//!
//! A frame on the wire is:
//!
//! ```text
//! u32 topic_len | topic bytes (utf8) | u32 payload_len | payload bytes
//! ```
//!
//! Topic and payload round-trip independently of whatever codec is in use —
//! the codec only ever sees the payload bytes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use event_protocol::Event;

/// Frames larger than this are rejected as malformed rather than read into
/// memory; a misbehaving peer shouldn't be able to force an unbounded alloc.
const MAX_FIELD_LEN: u32 = 16 * 1024 * 1024;

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Event> {
    let topic_len = reader.read_u32().await?;
    let topic = read_exact_field(reader, topic_len, "topic").await?;
    let topic = String::from_utf8(topic)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let payload_len = reader.read_u32().await?;
    let data = read_exact_field(reader, payload_len, "payload").await?;

    Ok(Event::new(topic, data))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    event: &Event,
) -> std::io::Result<()> {
    let topic_bytes = event.topic.as_bytes();
    writer.write_u32(topic_bytes.len() as u32).await?;
    writer.write_all(topic_bytes).await?;
    writer.write_u32(event.data.len() as u32).await?;
    writer.write_all(&event.data).await?;
    writer.flush().await
}

async fn read_exact_field<R: AsyncRead + Unpin>(
    reader: &mut R,
    len: u32,
    field: &'static str,
) -> std::io::Result<Vec<u8>> {
    if len > MAX_FIELD_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{field} length {len} exceeds {MAX_FIELD_LEN} byte limit"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}
