//! Server-side dispatch (spec §4.6): decode the synthetic `_args`
//! struct by parameter id (skipping unknown ids, defaulting missing
//! optional/none parameters), invoke the bound handler, and encode a
//! `_result` struct carrying either the success value at field 0, a
//! declared exception at its own field id, or — for anything the
//! handler didn't declare — a `TApplicationException(INTERNAL_ERROR)`
//! EXCEPTION message. Ground: cloudwego-volo's server-side processor
//! contract (`volo-thrift`'s generated `{Service}Processor`, described
//! rather than copied since no such generated file is in the pack) plus
//! the request/reply envelope handling in
//! `volo-thrift-src-transport-pingpong-thrift_transport.rs`.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::{
    metadata::{DecodedValue, Requiredness},
    rpc::{ApplicationException, ApplicationExceptionKind, ExceptionSlot, HandlerStack, ParamSlot},
    thrift::{TMessageIdentifier, TMessageType, TStructIdentifier, TType},
    wire::{ProtocolReader, ProtocolWriter},
    CodecError, CodecErrorKind,
};

/// Client/server connect/read/write budgets (spec §5 "Concurrency" ambient
/// config). Enforced by the connection loop via `monoio::time::timeout`,
/// not by `MethodProcessor`/`MethodHandler` themselves.
#[derive(Clone, Copy, Debug)]
pub struct ServerConfig {
    pub read_timeout: std::time::Duration,
    pub write_timeout: std::time::Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            read_timeout: std::time::Duration::from_secs(30),
            write_timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// What a bound handler invocation can fail with: one of the method's
/// own declared exception types (travels type-erased, matched against
/// `MethodProcessor::exceptions` by `TypeId`), or an arbitrary internal
/// error that becomes `TApplicationException(INTERNAL_ERROR)`.
pub enum HandlerError {
    Declared {
        type_id: TypeId,
        value: DecodedValue,
    },
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

pub type HandlerInvoke =
    Arc<dyn Fn(Vec<DecodedValue>) -> Result<DecodedValue, HandlerError> + Send + Sync>;

#[derive(Default)]
struct MethodStats {
    calls: AtomicU64,
    errors: AtomicU64,
    inflight: AtomicU64,
}

/// A point-in-time read of one method's counters (spec §5: "per-method
/// call/error/inflight counters" exposed for monitoring).
#[derive(Clone, Copy, Debug, Default)]
pub struct MethodStatsSnapshot {
    pub calls: u64,
    pub errors: u64,
    pub inflight: u64,
}

/// The server-side binding for one declared method: argument shape,
/// return/declared-exception codecs, the bound handler, and its call
/// counters.
pub struct MethodProcessor {
    name: &'static str,
    params: Vec<ParamSlot>,
    return_codec: Option<Arc<dyn crate::codec::Codec>>,
    exceptions: Vec<ExceptionSlot>,
    oneway: bool,
    invoke: HandlerInvoke,
    stats: MethodStats,
}

impl MethodProcessor {
    pub fn builder(name: &'static str) -> MethodProcessorBuilder {
        MethodProcessorBuilder {
            name,
            params: Vec::new(),
            return_codec: None,
            exceptions: Vec::new(),
            oneway: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stats(&self) -> MethodStatsSnapshot {
        MethodStatsSnapshot {
            calls: self.stats.calls.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            inflight: self.stats.inflight.load(Ordering::Relaxed),
        }
    }

    fn decode_args(&self, reader: &mut dyn ProtocolReader) -> Result<Vec<DecodedValue>, CodecError> {
        reader.read_struct_begin()?;
        let mut slots: Vec<Option<DecodedValue>> = self.params.iter().map(|_| None).collect();
        loop {
            let field = reader.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            let id = field.id.unwrap_or(i16::MIN);
            match self.params.iter().position(|p| p.id == id) {
                Some(idx) if field.field_type == self.params[idx].codec.wire_type() => {
                    slots[idx] = Some(self.params[idx].codec.read(reader)?);
                }
                _ => reader.skip(field.field_type)?,
            }
            reader.read_field_end()?;
        }
        reader.read_struct_end()?;

        let mut args = Vec::with_capacity(self.params.len());
        for (idx, param) in self.params.iter().enumerate() {
            match slots[idx].take() {
                Some(value) => args.push(value),
                None if param.requiredness == Requiredness::Required => {
                    return Err(CodecError::missing_required_field(param.id, param.name));
                }
                None => match &param.default {
                    Some(default) => args.push(default()),
                    None => {
                        return Err(CodecError::metadata(format!(
                            "{}: parameter {} missing and has no default",
                            self.name, param.name
                        )))
                    }
                },
            }
        }
        Ok(args)
    }

    fn write_reply_success(
        &self,
        writer: &mut dyn ProtocolWriter,
        msg_ident: &TMessageIdentifier,
        value: DecodedValue,
    ) -> Result<(), CodecError> {
        writer.write_message_begin(&TMessageIdentifier::new(
            msg_ident.name.clone(),
            TMessageType::Reply,
            msg_ident.sequence_number,
        ));
        writer.write_struct_begin(&TStructIdentifier::new(None));
        if let Some(codec) = &self.return_codec {
            writer.write_field_begin(codec.wire_type(), 0);
            codec.write(value.as_ref(), writer)?;
            writer.write_field_end();
        }
        writer.write_field_stop();
        writer.write_struct_end();
        writer.write_message_end();
        Ok(())
    }

    fn write_reply_exception(
        &self,
        writer: &mut dyn ProtocolWriter,
        msg_ident: &TMessageIdentifier,
        slot: &ExceptionSlot,
        value: DecodedValue,
    ) -> Result<(), CodecError> {
        writer.write_message_begin(&TMessageIdentifier::new(
            msg_ident.name.clone(),
            TMessageType::Reply,
            msg_ident.sequence_number,
        ));
        writer.write_struct_begin(&TStructIdentifier::new(None));
        writer.write_field_begin(slot.codec.wire_type(), slot.id);
        slot.codec.write(value.as_ref(), writer)?;
        writer.write_field_end();
        writer.write_field_stop();
        writer.write_struct_end();
        writer.write_message_end();
        Ok(())
    }

    fn write_application_exception(
        &self,
        writer: &mut dyn ProtocolWriter,
        msg_ident: &TMessageIdentifier,
        kind: ApplicationExceptionKind,
        message: impl Into<String>,
    ) -> Result<(), CodecError> {
        writer.write_message_begin(&TMessageIdentifier::new(
            msg_ident.name.clone(),
            TMessageType::Exception,
            msg_ident.sequence_number,
        ));
        ApplicationException::new(kind, message).write(writer)?;
        writer.write_message_end();
        Ok(())
    }

    /// Decodes the `_args` body, invokes the bound handler, and writes
    /// the reply — everything but the message envelope itself, which
    /// the caller (`ServiceProcessor`) has already consumed so it can
    /// dispatch on the method name first.
    pub fn process(
        &self,
        reader: &mut dyn ProtocolReader,
        writer: &mut dyn ProtocolWriter,
        msg_ident: &TMessageIdentifier,
        handlers: &HandlerStack,
    ) -> Result<(), CodecError> {
        self.stats.inflight.fetch_add(1, Ordering::Relaxed);
        let mut ctxs = handlers.contexts();
        handlers.pre_read(&mut ctxs);

        let args = match self.decode_args(reader) {
            Ok(args) => args,
            Err(e) => {
                self.stats.inflight.fetch_sub(1, Ordering::Relaxed);
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                if !self.oneway {
                    self.write_application_exception(
                        writer,
                        msg_ident,
                        ApplicationExceptionKind::ProtocolError,
                        e.message.clone(),
                    )?;
                }
                handlers.done(&mut ctxs);
                return Err(e);
            }
        };
        let args_boxed: DecodedValue = Box::new(args);
        handlers.post_read(&mut ctxs, args_boxed.as_ref());
        let args = *args_boxed
            .downcast::<Vec<DecodedValue>>()
            .expect("post_read hook must not change the value's type");

        let invocation = (self.invoke)(args);

        if self.oneway {
            self.stats.inflight.fetch_sub(1, Ordering::Relaxed);
            self.stats.calls.fetch_add(1, Ordering::Relaxed);
            handlers.done(&mut ctxs);
            return Ok(());
        }

        let result = match invocation {
            Ok(value) => {
                handlers.pre_write(&mut ctxs, value.as_ref());
                let outcome = self.write_reply_success(writer, msg_ident, value);
                if outcome.is_ok() {
                    handlers.post_write(&mut ctxs);
                }
                outcome
            }
            Err(HandlerError::Declared { type_id, value }) => {
                match self.exceptions.iter().find(|slot| slot.type_id == type_id) {
                    Some(slot) => {
                        let outcome = self.write_reply_exception(writer, msg_ident, slot, value);
                        if outcome.is_ok() {
                            handlers.post_write(&mut ctxs);
                        }
                        outcome
                    }
                    None => {
                        let e = CodecError::new(
                            CodecErrorKind::Application,
                            format!("{}: handler raised an undeclared exception type", self.name),
                        );
                        handlers.pre_write_exception(&mut ctxs, &e);
                        let outcome = self.write_application_exception(
                            writer,
                            msg_ident,
                            ApplicationExceptionKind::InternalError,
                            e.message.clone(),
                        );
                        if outcome.is_ok() {
                            handlers.post_write_exception(&mut ctxs, &e);
                        }
                        outcome
                    }
                }
            }
            Err(HandlerError::Internal(err)) => {
                tracing::error!("{}: handler returned an internal error: {}", self.name, err);
                let e = CodecError::new(CodecErrorKind::Application, err.to_string());
                handlers.pre_write_exception(&mut ctxs, &e);
                let outcome = self.write_application_exception(
                    writer,
                    msg_ident,
                    ApplicationExceptionKind::InternalError,
                    err.to_string(),
                );
                if outcome.is_ok() {
                    handlers.post_write_exception(&mut ctxs, &e);
                }
                outcome
            }
        };

        self.stats.inflight.fetch_sub(1, Ordering::Relaxed);
        if result.is_err() {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.calls.fetch_add(1, Ordering::Relaxed);
        }
        handlers.done(&mut ctxs);
        result
    }
}

pub struct MethodProcessorBuilder {
    name: &'static str,
    params: Vec<ParamSlot>,
    return_codec: Option<Arc<dyn crate::codec::Codec>>,
    exceptions: Vec<ExceptionSlot>,
    oneway: bool,
}

impl MethodProcessorBuilder {
    pub fn param(mut self, param: ParamSlot) -> Self {
        self.params.push(param);
        self
    }

    pub fn returns(mut self, codec: Arc<dyn crate::codec::Codec>) -> Self {
        self.return_codec = Some(codec);
        self
    }

    pub fn exception(mut self, exception: ExceptionSlot) -> Self {
        self.exceptions.push(exception);
        self
    }

    pub fn oneway(mut self) -> Self {
        self.oneway = true;
        self
    }

    pub fn build(self, invoke: HandlerInvoke) -> MethodProcessor {
        MethodProcessor {
            name: self.name,
            params: self.params,
            return_codec: self.return_codec,
            exceptions: self.exceptions,
            oneway: self.oneway,
            invoke,
            stats: MethodStats::default(),
        }
    }
}

/// Dispatches an already-framed message: reads the message envelope,
/// routes on its name, and delegates the struct body to the matching
/// `MethodProcessor`. Implemented by `ServiceProcessor` (one service)
/// and `crate::rpc::MultiplexedProcessor` (name-prefixed fan-out to
/// several).
pub trait Processor: Send + Sync {
    /// Handles one call whose envelope has already been read as
    /// `msg_ident` — used by `MultiplexedProcessor` to redispatch after
    /// stripping a `"Service:method"` prefix without re-reading the
    /// envelope.
    fn process_call(
        &self,
        msg_ident: &TMessageIdentifier,
        reader: &mut dyn ProtocolReader,
        writer: &mut dyn ProtocolWriter,
        handlers: &HandlerStack,
    ) -> Result<(), CodecError>;

    /// Reads one message's envelope and dispatches it.
    fn process(
        &self,
        reader: &mut dyn ProtocolReader,
        writer: &mut dyn ProtocolWriter,
        handlers: &HandlerStack,
    ) -> Result<(), CodecError> {
        let msg_ident = reader.read_message_begin()?;
        let result = self.process_call(&msg_ident, reader, writer, handlers);
        reader.read_message_end()?;
        result
    }
}

/// A single service's method table (spec §4.6's default, non-multiplexed
/// dispatch target).
#[derive(Default)]
pub struct ServiceProcessor {
    methods: HashMap<&'static str, MethodProcessor>,
}

impl ServiceProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: MethodProcessor) {
        self.methods.insert(method.name, method);
    }

    pub fn method(&self, name: &str) -> Option<&MethodProcessor> {
        self.methods.get(name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodProcessor> {
        self.methods.values()
    }
}

impl Processor for ServiceProcessor {
    fn process_call(
        &self,
        msg_ident: &TMessageIdentifier,
        reader: &mut dyn ProtocolReader,
        writer: &mut dyn ProtocolWriter,
        handlers: &HandlerStack,
    ) -> Result<(), CodecError> {
        if !matches!(
            msg_ident.message_type,
            TMessageType::Call | TMessageType::OneWay
        ) {
            reader.skip(TType::Struct)?;
            return Err(CodecError::new(
                CodecErrorKind::InvalidMessageType,
                format!(
                    "server received a {:?} message, expected CALL or ONEWAY",
                    msg_ident.message_type
                ),
            ));
        }

        match self.methods.get(msg_ident.name.as_str()) {
            Some(method) => method.process(reader, writer, msg_ident, handlers),
            None => {
                reader.skip(TType::Struct)?;
                let exc = ApplicationException::new(
                    ApplicationExceptionKind::UnknownMethod,
                    format!("unknown method {}", msg_ident.name),
                );
                if msg_ident.message_type != TMessageType::OneWay {
                    writer.write_message_begin(&TMessageIdentifier::new(
                        msg_ident.name.clone(),
                        TMessageType::Exception,
                        msg_ident.sequence_number,
                    ));
                    exc.write(writer)?;
                    writer.write_message_end();
                }
                Err(CodecError::new(
                    CodecErrorKind::UnknownMethod,
                    format!("unknown method {}", msg_ident.name),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::{
        codec::scalar::i32_codec,
        wire::{BinaryReader, BinaryWriter},
    };

    fn arg_slot(id: i16, name: &'static str, requiredness: Requiredness) -> ParamSlot {
        ParamSlot {
            id,
            name,
            requiredness,
            codec: i32_codec(),
            default: Some(std::sync::Arc::new(|| Box::new(0i32) as DecodedValue)),
        }
    }

    fn write_args_call(buf: &mut BytesMut, name: &'static str, seq: i32, args: &[(i16, i32)]) {
        let mut w = BinaryWriter::new(buf);
        w.write_message_begin(&TMessageIdentifier::new(name, TMessageType::Call, seq));
        w.write_struct_begin(&TStructIdentifier::new(None));
        for (id, value) in args {
            w.write_field_begin(TType::I32, *id);
            w.write_i32(*value);
            w.write_field_end();
        }
        w.write_field_stop();
        w.write_struct_end();
        w.write_message_end();
    }

    #[test]
    fn process_writes_success_reply_and_increments_call_counter() {
        let method = MethodProcessor::builder("add")
            .param(arg_slot(1, "a", Requiredness::Required))
            .param(arg_slot(2, "b", Requiredness::Required))
            .returns(i32_codec())
            .build(std::sync::Arc::new(|args: Vec<DecodedValue>| {
                let a = *args[0].downcast_ref::<i32>().unwrap();
                let b = *args[1].downcast_ref::<i32>().unwrap();
                Ok(Box::new(a + b) as DecodedValue)
            }));

        let mut in_buf = BytesMut::new();
        write_args_call(&mut in_buf, "add", 7, &[(1, 2), (2, 3)]);
        let mut reader = BinaryReader::new(in_buf.freeze());
        let msg_ident = reader.read_message_begin().unwrap();

        let mut out_buf = BytesMut::new();
        let mut writer = BinaryWriter::new(&mut out_buf);
        let handlers = HandlerStack::new();
        method.process(&mut reader, &mut writer, &msg_ident, &handlers).unwrap();

        let mut out_reader = BinaryReader::new(out_buf.freeze());
        let reply_ident = out_reader.read_message_begin().unwrap();
        assert_eq!(reply_ident.message_type, TMessageType::Reply);
        assert_eq!(reply_ident.sequence_number, 7);
        out_reader.read_struct_begin().unwrap();
        let field = out_reader.read_field_begin().unwrap();
        assert_eq!(field.id, Some(0));
        assert_eq!(out_reader.read_i32().unwrap(), 5);

        let snapshot = method.stats();
        assert_eq!(snapshot.calls, 1);
        assert_eq!(snapshot.errors, 0);
        assert_eq!(snapshot.inflight, 0);
    }

    #[test]
    fn missing_required_param_fails_and_counts_as_error() {
        let method = MethodProcessor::builder("add")
            .param(arg_slot(1, "a", Requiredness::Required))
            .returns(i32_codec())
            .build(std::sync::Arc::new(|_| Ok(Box::new(0i32) as DecodedValue)));

        let mut in_buf = BytesMut::new();
        write_args_call(&mut in_buf, "add", 1, &[]);
        let mut reader = BinaryReader::new(in_buf.freeze());
        let msg_ident = reader.read_message_begin().unwrap();

        let mut out_buf = BytesMut::new();
        let mut writer = BinaryWriter::new(&mut out_buf);
        let handlers = HandlerStack::new();
        let err = method.process(&mut reader, &mut writer, &msg_ident, &handlers).unwrap_err();
        assert!(matches!(err.kind, CodecErrorKind::MissingRequiredField { .. }));
        assert_eq!(method.stats().errors, 1);

        let mut out_reader = BinaryReader::new(out_buf.freeze());
        let reply_ident = out_reader.read_message_begin().unwrap();
        assert_eq!(reply_ident.message_type, TMessageType::Exception);
        let exc = ApplicationException::read(&mut out_reader).unwrap();
        assert_eq!(exc.kind, ApplicationExceptionKind::ProtocolError);
    }

    #[test]
    fn missing_optional_param_falls_back_to_default() {
        let method = MethodProcessor::builder("add")
            .param(arg_slot(1, "a", Requiredness::Optional))
            .returns(i32_codec())
            .build(std::sync::Arc::new(|args: Vec<DecodedValue>| {
                Ok(Box::new(*args[0].downcast_ref::<i32>().unwrap()) as DecodedValue)
            }));

        let mut in_buf = BytesMut::new();
        write_args_call(&mut in_buf, "add", 1, &[]);
        let mut reader = BinaryReader::new(in_buf.freeze());
        let msg_ident = reader.read_message_begin().unwrap();

        let mut out_buf = BytesMut::new();
        let mut writer = BinaryWriter::new(&mut out_buf);
        let handlers = HandlerStack::new();
        method.process(&mut reader, &mut writer, &msg_ident, &handlers).unwrap();
        assert_eq!(method.stats().calls, 1);
    }

    #[test]
    fn oneway_method_writes_no_reply() {
        let method = MethodProcessor::builder("notify")
            .param(arg_slot(1, "a", Requiredness::Required))
            .oneway()
            .build(std::sync::Arc::new(|_| Ok(Box::new(()) as DecodedValue)));

        let mut in_buf = BytesMut::new();
        write_args_call(&mut in_buf, "notify", 1, &[(1, 9)]);
        let mut reader = BinaryReader::new(in_buf.freeze());
        let msg_ident = reader.read_message_begin().unwrap();

        let mut out_buf = BytesMut::new();
        let mut writer = BinaryWriter::new(&mut out_buf);
        let handlers = HandlerStack::new();
        method.process(&mut reader, &mut writer, &msg_ident, &handlers).unwrap();
        assert!(out_buf.is_empty());
    }

    #[test]
    fn undeclared_handler_error_becomes_internal_application_exception() {
        let method = MethodProcessor::builder("add")
            .returns(i32_codec())
            .build(std::sync::Arc::new(|_| {
                Err(HandlerError::Internal("boom".into()))
            }));

        let mut in_buf = BytesMut::new();
        write_args_call(&mut in_buf, "add", 1, &[]);
        let mut reader = BinaryReader::new(in_buf.freeze());
        let msg_ident = reader.read_message_begin().unwrap();

        let mut out_buf = BytesMut::new();
        let mut writer = BinaryWriter::new(&mut out_buf);
        let handlers = HandlerStack::new();
        method.process(&mut reader, &mut writer, &msg_ident, &handlers).unwrap();

        let mut out_reader = BinaryReader::new(out_buf.freeze());
        let reply_ident = out_reader.read_message_begin().unwrap();
        assert_eq!(reply_ident.message_type, TMessageType::Exception);
        let exc = ApplicationException::read(&mut out_reader).unwrap();
        assert_eq!(exc.kind, ApplicationExceptionKind::InternalError);
        assert_eq!(method.stats().errors, 1);
    }

    #[test]
    fn service_processor_replies_unknown_method_as_application_exception() {
        let mut service = ServiceProcessor::new();
        service.register(
            MethodProcessor::builder("add")
                .returns(i32_codec())
                .build(std::sync::Arc::new(|_| Ok(Box::new(0i32) as DecodedValue))),
        );

        let mut in_buf2 = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut in_buf2);
            w.write_message_begin(&TMessageIdentifier::new("missing", TMessageType::Call, 1));
            w.write_struct_begin(&TStructIdentifier::new(None));
            w.write_field_stop();
            w.write_struct_end();
            w.write_message_end();
        }

        let mut reader = BinaryReader::new(in_buf2.freeze());
        let mut out_buf = BytesMut::new();
        let mut writer = BinaryWriter::new(&mut out_buf);
        let handlers = HandlerStack::new();
        let err = service.process(&mut reader, &mut writer, &handlers).unwrap_err();
        assert!(matches!(err.kind, CodecErrorKind::UnknownMethod));

        let mut out_reader = BinaryReader::new(out_buf.freeze());
        let reply_ident = out_reader.read_message_begin().unwrap();
        assert_eq!(reply_ident.message_type, TMessageType::Exception);
        let exc = ApplicationException::read(&mut out_reader).unwrap();
        assert_eq!(exc.kind, ApplicationExceptionKind::UnknownMethod);
    }
}
