//! The "raw" framing mode: the payload codec runs directly against the
//! connection's byte stream, with no length prefix or header envelope.
//! Only usable over transports that already preserve message boundaries
//! (e.g. one request per connection) since nothing here delimits frames.

use bytes::BytesMut;
use monoio_codec::{Decoded, Decoder, Encoder};

pub struct Unframed<T> {
    inner: T,
}

impl<T> Unframed<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T: Decoder> Decoder for Unframed<T> {
    type Item = T::Item;
    type Error = T::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Decoded<Self::Item>, Self::Error> {
        self.inner.decode(src)
    }
}

impl<T: Encoder<Item>, Item> Encoder<Item> for Unframed<T> {
    type Error = T::Error;

    fn encode(&mut self, item: Item, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.inner.encode(item, dst)
    }
}
