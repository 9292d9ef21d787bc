//! `MultiplexedProcessor` (supplemented: spec's default dispatch is a
//! single `ServiceProcessor`; this mirrors Apache Thrift's
//! `TMultiplexedProcessor` for serving several services over one
//! connection). Requests are routed by a `"Service:method"` prefix on
//! the message name; everything after dispatch — argument decode,
//! handler invocation, reply encoding — is unchanged and stays with the
//! target service's own `Processor`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    rpc::{HandlerStack, Processor},
    thrift::{TMessageIdentifier, TType},
    wire::{ProtocolReader, ProtocolWriter},
    CodecError, CodecErrorKind,
};

#[derive(Default)]
pub struct MultiplexedProcessor {
    services: HashMap<String, Arc<dyn Processor>>,
}

impl MultiplexedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service_name: impl Into<String>, processor: Arc<dyn Processor>) {
        self.services.insert(service_name.into(), processor);
    }
}

impl Processor for MultiplexedProcessor {
    fn process_call(
        &self,
        msg_ident: &TMessageIdentifier,
        reader: &mut dyn ProtocolReader,
        writer: &mut dyn ProtocolWriter,
        handlers: &HandlerStack,
    ) -> Result<(), CodecError> {
        let Some((service_name, method_name)) = msg_ident.name.split_once(':') else {
            reader.skip(TType::Struct)?;
            return Err(CodecError::new(
                CodecErrorKind::UnknownMethod,
                format!(
                    "multiplexed dispatch requires a \"Service:method\" name, got {}",
                    msg_ident.name
                ),
            ));
        };

        match self.services.get(service_name) {
            Some(processor) => {
                let inner_ident = TMessageIdentifier::new(
                    method_name,
                    msg_ident.message_type,
                    msg_ident.sequence_number,
                );
                processor.process_call(&inner_ident, reader, writer, handlers)
            }
            None => {
                reader.skip(TType::Struct)?;
                Err(CodecError::new(
                    CodecErrorKind::UnknownMethod,
                    format!("unknown service {service_name}"),
                ))
            }
        }
    }
}
