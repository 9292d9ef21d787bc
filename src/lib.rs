mod error;

pub use error::{CodecError, CodecErrorKind};

pub mod thrift;

pub mod wire;

pub mod transport;

pub mod metadata;

pub mod catalog;

pub mod codec;

pub mod rpc;
