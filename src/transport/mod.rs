//! Framing modes that wrap the Thrift payload codec before it reaches
//! the network: `unframed` passthrough, length-`framed`, and CloudWeGo
//! TTHeader. Ground: teacher crate's `src/codec/{framed,ttheader}.rs`,
//! kept verbatim (this is ambient transport plumbing untouched by the
//! move from catalog/struct-codec territory).

pub mod framed;
pub mod ttheader;
pub mod unframed;

pub use framed::FramedHeader;
pub use ttheader::{
    ProtocolId, RawPayloadCodec, TTHeader, TTHeaderDecoder, TTHeaderEncoder, TTHeaderPayload,
    TTHeaderPayloadDecoder, TTHeaderPayloadEncoder,
};
pub use unframed::Unframed;

/// Which framing mode a connection negotiated or was configured with.
/// The RPC client/server pick a `Framing` once per connection and drive
/// the chosen codec stack for every message on it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Framing {
    Unframed,
    Framed,
    TTHeader,
}
