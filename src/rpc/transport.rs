//! Async message framing for a live connection: fills an owned `BytesMut`
//! from a monoio transport exactly the way the teacher's
//! `TBinaryProtocol` async constructor does (ground:
//! `monoio-rs-monoio-thrift/src/binary.rs::read_more_at_least`), then
//! hands a complete message's bytes to the synchronous `ProtocolReader`/
//! `ProtocolWriter` pair. `crate::wire` never touches I/O; this is the
//! only place that does.

use bytes::{Buf, Bytes, BytesMut};
use monoio::{
    buf::{IoBufMut, SliceMut},
    io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt},
};
use monoio_codec::{Decoded, Decoder, Encoder};

use crate::{
    transport::{
        Framing, FramedHeader, RawPayloadCodec, TTHeader, TTHeaderPayload, TTHeaderPayloadDecoder,
        TTHeaderPayloadEncoder, Unframed,
    },
    CodecError, CodecErrorKind,
};

async fn read_more_at_least<T: AsyncReadRent>(
    io: &mut T,
    buffer: &mut BytesMut,
    to_read: usize,
) -> std::io::Result<()> {
    const MIN_CAPACITY: usize = 4096;
    buffer.reserve(to_read.max(MIN_CAPACITY));
    let mut read = buffer.len();
    let end = buffer.capacity();
    let at_least = read + to_read;
    while read < at_least {
        let buf = std::mem::take(buffer);
        let slice = unsafe { SliceMut::new_unchecked(buf, read, end) };
        let (r, b) = io.read(slice).await;
        *buffer = b.into_inner();
        let n = r?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        read += n;
        unsafe { buffer.set_init(read) };
    }
    Ok(())
}

/// One connection's framing state: the chosen `Framing` mode plus the
/// read-side buffer it's accumulated so far. A `MethodHandler`/
/// `ServiceProcessor` drives one message at a time through
/// `read_message`/`write_message`; everything above the framing prefix
/// is the plain Thrift message body a `ProtocolReader`/`ProtocolWriter`
/// already knows how to parse.
pub struct Connection<IO> {
    io: IO,
    framing: Framing,
    read_buf: BytesMut,
}

impl<IO> Connection<IO> {
    pub fn new(io: IO, framing: Framing) -> Self {
        Connection {
            io,
            framing,
            read_buf: BytesMut::new(),
        }
    }

    pub fn into_inner(self) -> IO {
        self.io
    }
}

impl<IO: AsyncReadRent> Connection<IO> {
    async fn ensure(&mut self, n: usize) -> Result<(), CodecError> {
        if self.read_buf.len() < n {
            let need = n - self.read_buf.len();
            read_more_at_least(&mut self.io, &mut self.read_buf, need).await?;
        }
        Ok(())
    }

    /// Reads one complete message body (everything a `ProtocolReader`
    /// would see, with any framing prefix already stripped) off the
    /// connection, buffering more bytes as needed.
    pub async fn read_message(&mut self) -> Result<Bytes, CodecError> {
        match self.framing {
            Framing::Unframed => {
                if self.read_buf.is_empty() {
                    read_more_at_least(&mut self.io, &mut self.read_buf, 1).await?;
                }
                Ok(self.read_buf.split().freeze())
            }
            Framing::Framed => {
                self.ensure(4).await?;
                let length = i32::from_be_bytes(self.read_buf[..4].try_into().unwrap());
                if length <= 0 {
                    return Err(CodecError::new(
                        CodecErrorKind::InvalidData,
                        "illegal thrift frame length",
                    ));
                }
                let total = 4 + length as usize;
                self.ensure(total).await?;
                self.read_buf.advance(4);
                Ok(self.read_buf.split_to(length as usize).freeze())
            }
            Framing::TTHeader => {
                self.ensure(4).await?;
                let total_length = u32::from_be_bytes(self.read_buf[..4].try_into().unwrap());
                self.ensure(4 + total_length as usize).await?;
                let mut decoder = TTHeaderPayloadDecoder::new(RawPayloadCodec::new());
                match decoder.decode(&mut self.read_buf) {
                    Ok(Decoded::Some(item)) => Ok(item
                        .payload
                        .expect("payload decoder always yields a value once it starts decoding")),
                    Ok(_) => Err(CodecError::new(
                        CodecErrorKind::Transport,
                        "ttheader decode reported insufficient data after a full frame was buffered",
                    )),
                    Err(e) => Err(CodecError::from(e)),
                }
            }
        }
    }
}

impl<IO: AsyncWriteRent> Connection<IO> {
    /// Writes one complete message body, applying the connection's
    /// framing, and flushes it to the transport.
    pub async fn write_message(&mut self, body: Bytes) -> Result<(), CodecError> {
        let mut out = BytesMut::with_capacity(body.len() + 32);
        match self.framing {
            Framing::Unframed => {
                let mut encoder = Unframed::new(RawPayloadCodec::new());
                encoder.encode(body, &mut out).map_err(CodecError::from)?;
            }
            Framing::Framed => {
                let mut encoder = FramedHeader::new(RawPayloadCodec::new());
                encoder.encode(body, &mut out).map_err(CodecError::from)?;
            }
            Framing::TTHeader => {
                let mut encoder = TTHeaderPayloadEncoder::new(RawPayloadCodec::new());
                let item = TTHeaderPayload {
                    ttheader: TTHeader::new_for_encode(body.len() as u32),
                    payload: Some(body),
                };
                encoder.encode(item, &mut out).map_err(CodecError::from)?;
            }
        }
        let (result, _buf) = self.io.write_all(out).await;
        result.map_err(CodecError::from)?;
        self.io.flush().await.map_err(CodecError::from)?;
        Ok(())
    }
}
