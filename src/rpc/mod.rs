//! The RPC Method Dispatcher (spec §4.6, §4.7, §4.8): the server-side
//! `MethodProcessor`/`ServiceProcessor`, the client-side `MethodHandler`,
//! the `TApplicationException` kind set both sides share, and the
//! `EventHandler`/`HandlerStack` observer contract. None of this exists
//! in the teacher crate (`monoio-rs-monoio-thrift` stops at the protocol
//! layer); it is grounded on cloudwego-volo's `volo-thrift` crate, the
//! only example repo in the retrieval pack with an actual client/server
//! call-envelope implementation (`message_wrapper.rs`,
//! `transport/pingpong/thrift_transport.rs`).

pub mod client;
pub mod events;
pub mod multiplex;
pub mod server;
pub mod transport;

use std::any::TypeId;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;

use num_enum::TryFromPrimitive;

use crate::{
    codec::Codec,
    metadata::Requiredness,
    thrift::{TFieldIdentifier, TStructIdentifier, TType},
    wire::{ProtocolReader, ProtocolWriter},
    CodecError, CodecErrorKind,
};

pub use client::{ClientCallError, ClientConfig, MethodHandler, SeqIdGen};
pub use events::{EventHandler, HandlerStack};
pub use multiplex::MultiplexedProcessor;
pub use server::{
    HandlerError, HandlerInvoke, MethodProcessor, MethodProcessorBuilder, MethodStatsSnapshot,
    Processor, ServerConfig, ServiceProcessor,
};
pub use transport::Connection;

/// `TApplicationException::ExceptionType` (spec §4.6/§4.7): the closed
/// set of dispatcher-level failures, as opposed to a method's own
/// declared exceptions, which travel as type-erased `DecodedValue`s and
/// never appear here.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(i32)]
pub enum ApplicationExceptionKind {
    Unknown = 0,
    UnknownMethod = 1,
    InvalidMessageType = 2,
    WrongMethodName = 3,
    BadSequenceId = 4,
    MissingResult = 5,
    InternalError = 6,
    ProtocolError = 7,
    InvalidTransform = 8,
    InvalidProtocol = 9,
    UnsupportedClientType = 10,
}

impl Display for ApplicationExceptionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

/// `TApplicationException` (spec §4.6/§4.7): the wire-level error shape
/// every Thrift RPC implementation sends back as an EXCEPTION message
/// when a call fails for a reason that isn't one of the method's own
/// declared exceptions. On the wire it is a plain two-field struct
/// (message at field 1, type at field 2); hand-encoded here rather than
/// built through `StructMetadata`, since both sides of the dispatcher
/// need it before any catalog/codec machinery is available to decode a
/// call in the first place.
#[derive(Clone, Debug)]
pub struct ApplicationException {
    pub kind: ApplicationExceptionKind,
    pub message: String,
}

impl ApplicationException {
    pub fn new(kind: ApplicationExceptionKind, message: impl Into<String>) -> Self {
        ApplicationException {
            kind,
            message: message.into(),
        }
    }

    pub fn write(&self, writer: &mut dyn ProtocolWriter) -> Result<(), CodecError> {
        writer.write_struct_begin(&TStructIdentifier::new(Some("TApplicationException")));
        writer.write_field_begin(TType::Binary, 1);
        writer.write_string(&self.message);
        writer.write_field_end();
        writer.write_field_begin(TType::I32, 2);
        writer.write_i32(self.kind as i32);
        writer.write_field_end();
        writer.write_field_stop();
        writer.write_struct_end();
        Ok(())
    }

    pub fn read(reader: &mut dyn ProtocolReader) -> Result<Self, CodecError> {
        reader.read_struct_begin()?;
        let mut message = String::new();
        let mut kind = ApplicationExceptionKind::Unknown;
        loop {
            let field: TFieldIdentifier = reader.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match (field.id, field.field_type) {
                (Some(1), TType::Binary) => message = reader.read_string()?,
                (Some(2), TType::I32) => {
                    let raw = reader.read_i32()?;
                    kind = ApplicationExceptionKind::try_from(raw)
                        .unwrap_or(ApplicationExceptionKind::Unknown);
                }
                _ => reader.skip(field.field_type)?,
            }
            reader.read_field_end()?;
        }
        reader.read_struct_end()?;
        Ok(ApplicationException { kind, message })
    }
}

impl Display for ApplicationException {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApplicationException {}

impl From<&ApplicationException> for CodecError {
    fn from(exc: &ApplicationException) -> Self {
        CodecError::new(CodecErrorKind::Application, exc.message.clone())
    }
}

/// One field of a method's synthetic `_args`/`_result` struct: a
/// parameter on the way in, a declared exception on the way out. Built
/// by hand from `crate::metadata::MethodMetadata` rather than going
/// through `StructMetadata`/`StructCodec` — the envelope shape (fixed
/// success-or-one-exception cardinality, no constructor/builder
/// resolution) doesn't fit the general struct engine, and both
/// dispatcher sides need it before any catalog lookup happens.
#[derive(Clone)]
pub struct ParamSlot {
    pub id: i16,
    pub name: &'static str,
    pub requiredness: Requiredness,
    pub codec: Arc<dyn Codec>,
    /// Supplies a value when this parameter is absent after decode;
    /// required whenever `requiredness != Required` (spec §4.6: "missing
    /// parameters default to the user-domain uninitialized value").
    pub default: Option<Arc<dyn Fn() -> crate::metadata::DecodedValue + Send + Sync>>,
}

#[derive(Clone)]
pub struct ExceptionSlot {
    pub id: i16,
    pub type_id: TypeId,
    pub codec: Arc<dyn Codec>,
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::wire::{BinaryReader, BinaryWriter, CompactReader, CompactWriter};

    #[test]
    fn application_exception_round_trips_over_binary() {
        let exc = ApplicationException::new(ApplicationExceptionKind::UnknownMethod, "no such method");
        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            exc.write(&mut w).unwrap();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let decoded = ApplicationException::read(&mut r).unwrap();
        assert_eq!(decoded.kind, ApplicationExceptionKind::UnknownMethod);
        assert_eq!(decoded.message, "no such method");
    }

    #[test]
    fn application_exception_round_trips_over_compact() {
        let exc = ApplicationException::new(ApplicationExceptionKind::BadSequenceId, "seq mismatch");
        let mut buf = BytesMut::new();
        {
            let mut w = CompactWriter::new(&mut buf);
            exc.write(&mut w).unwrap();
        }
        let mut r = CompactReader::new(buf.freeze());
        let decoded = ApplicationException::read(&mut r).unwrap();
        assert_eq!(decoded.kind, ApplicationExceptionKind::BadSequenceId);
        assert_eq!(decoded.message, "seq mismatch");
    }

    /// An unrecognized exception-type ordinal on the wire falls back to
    /// `Unknown` rather than failing decode outright.
    #[test]
    fn unrecognized_kind_falls_back_to_unknown() {
        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            w.write_struct_begin(&TStructIdentifier::new(Some("TApplicationException")));
            w.write_field_begin(TType::Binary, 1);
            w.write_string("boom");
            w.write_field_end();
            w.write_field_begin(TType::I32, 2);
            w.write_i32(999);
            w.write_field_end();
            w.write_field_stop();
            w.write_struct_end();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let decoded = ApplicationException::read(&mut r).unwrap();
        assert_eq!(decoded.kind, ApplicationExceptionKind::Unknown);
    }

    #[test]
    fn unknown_fields_are_skipped_on_read() {
        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            w.write_struct_begin(&TStructIdentifier::new(Some("TApplicationException")));
            w.write_field_begin(TType::I32, 99);
            w.write_i32(7);
            w.write_field_end();
            w.write_field_begin(TType::Binary, 1);
            w.write_string("hi");
            w.write_field_end();
            w.write_field_stop();
            w.write_struct_end();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let decoded = ApplicationException::read(&mut r).unwrap();
        assert_eq!(decoded.message, "hi");
    }

    #[test]
    fn display_includes_kind_and_message() {
        let exc = ApplicationException::new(ApplicationExceptionKind::InternalError, "boom");
        assert_eq!(exc.to_string(), "InternalError: boom");
    }

    #[test]
    fn codec_error_from_application_exception_carries_message() {
        let exc = ApplicationException::new(ApplicationExceptionKind::ProtocolError, "bad frame");
        let err: CodecError = (&exc).into();
        assert!(matches!(err.kind, CodecErrorKind::Application));
        assert!(err.to_string().contains("bad frame"));
    }
}
