//! The server-side observer contract (spec §4.8): `getContext -> preRead
//! -> postRead(args) -> preWrite(result)|preWriteException(e) ->
//! postWrite|postWriteException -> done`, invoked in registration order
//! around one call's processing. Ground: Apache Thrift's
//! `TProcessorEventHandler`/`TServerEventHandler` pair, which this spec
//! section is a direct description of; no Rust example in the pack
//! implements this specific hook set, so the shape below follows the
//! upstream contract's method names translated into idiomatic Rust
//! (default no-op methods on a trait, rather than a base class to
//! override).

use std::any::Any;

use crate::CodecError;

/// One observer of the request lifecycle. Every method has a no-op
/// default so a handler only needs to implement the hooks it cares
/// about. `get_context` is called once per call, before `pre_read`; its
/// return value is threaded through the rest of that call's hooks and
/// dropped afterwards — handlers are never called concurrently for the
/// same call, so plain interior state in the context is enough.
pub trait EventHandler: Send + Sync {
    fn get_context(&self) -> Box<dyn Any + Send> {
        Box::new(())
    }
    fn pre_read(&self, _ctx: &mut (dyn Any + Send)) {}
    fn post_read(&self, _ctx: &mut (dyn Any + Send), _args: &(dyn Any + Send)) {}
    fn pre_write(&self, _ctx: &mut (dyn Any + Send), _result: &(dyn Any + Send)) {}
    fn pre_write_exception(&self, _ctx: &mut (dyn Any + Send), _error: &CodecError) {}
    fn post_write(&self, _ctx: &mut (dyn Any + Send)) {}
    fn post_write_exception(&self, _ctx: &mut (dyn Any + Send), _error: &CodecError) {}
    fn done(&self, _ctx: &mut (dyn Any + Send)) {}
}

/// An ordered list of `EventHandler`s, invoked together. Pure observers:
/// nothing here can fail the call or change its outcome, matching spec
/// §4.8's "pure-observer contract" note.
#[derive(Default, Clone)]
pub struct HandlerStack {
    handlers: Vec<std::sync::Arc<dyn EventHandler>>,
}

impl HandlerStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: std::sync::Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub(crate) fn contexts(&self) -> Vec<Box<dyn Any + Send>> {
        self.handlers.iter().map(|h| h.get_context()).collect()
    }

    pub(crate) fn pre_read(&self, ctxs: &mut [Box<dyn Any + Send>]) {
        for (h, ctx) in self.handlers.iter().zip(ctxs.iter_mut()) {
            h.pre_read(ctx.as_mut());
        }
    }

    pub(crate) fn post_read(&self, ctxs: &mut [Box<dyn Any + Send>], args: &(dyn Any + Send)) {
        for (h, ctx) in self.handlers.iter().zip(ctxs.iter_mut()) {
            h.post_read(ctx.as_mut(), args);
        }
    }

    pub(crate) fn pre_write(&self, ctxs: &mut [Box<dyn Any + Send>], result: &(dyn Any + Send)) {
        for (h, ctx) in self.handlers.iter().zip(ctxs.iter_mut()) {
            h.pre_write(ctx.as_mut(), result);
        }
    }

    pub(crate) fn pre_write_exception(&self, ctxs: &mut [Box<dyn Any + Send>], error: &CodecError) {
        for (h, ctx) in self.handlers.iter().zip(ctxs.iter_mut()) {
            h.pre_write_exception(ctx.as_mut(), error);
        }
    }

    pub(crate) fn post_write(&self, ctxs: &mut [Box<dyn Any + Send>]) {
        for (h, ctx) in self.handlers.iter().zip(ctxs.iter_mut()) {
            h.post_write(ctx.as_mut());
        }
    }

    pub(crate) fn post_write_exception(&self, ctxs: &mut [Box<dyn Any + Send>], error: &CodecError) {
        for (h, ctx) in self.handlers.iter().zip(ctxs.iter_mut()) {
            h.post_write_exception(ctx.as_mut(), error);
        }
    }

    pub(crate) fn done(&self, ctxs: &mut [Box<dyn Any + Send>]) {
        for (h, ctx) in self.handlers.iter().zip(ctxs.iter_mut()) {
            h.done(ctx.as_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
    }

    impl EventHandler for Recorder {
        fn pre_read(&self, _ctx: &mut (dyn Any + Send)) {
            self.calls.lock().unwrap().push("pre_read");
        }
        fn post_read(&self, _ctx: &mut (dyn Any + Send), _args: &(dyn Any + Send)) {
            self.calls.lock().unwrap().push("post_read");
        }
        fn pre_write(&self, _ctx: &mut (dyn Any + Send), _result: &(dyn Any + Send)) {
            self.calls.lock().unwrap().push("pre_write");
        }
        fn post_write(&self, _ctx: &mut (dyn Any + Send)) {
            self.calls.lock().unwrap().push("post_write");
        }
        fn done(&self, _ctx: &mut (dyn Any + Send)) {
            self.calls.lock().unwrap().push("done");
        }
    }

    #[test]
    fn hooks_fire_in_lifecycle_order() {
        let recorder = std::sync::Arc::new(Recorder::default());
        let mut stack = HandlerStack::new();
        stack.register(recorder.clone());

        let mut ctxs = stack.contexts();
        stack.pre_read(&mut ctxs);
        stack.post_read(&mut ctxs, &() as &(dyn Any + Send));
        stack.pre_write(&mut ctxs, &() as &(dyn Any + Send));
        stack.post_write(&mut ctxs);
        stack.done(&mut ctxs);

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(*calls, vec!["pre_read", "post_read", "pre_write", "post_write", "done"]);
    }

    #[test]
    fn multiple_handlers_each_get_their_own_context() {
        let a = std::sync::Arc::new(Recorder::default());
        let b = std::sync::Arc::new(Recorder::default());
        let mut stack = HandlerStack::new();
        stack.register(a.clone());
        stack.register(b.clone());

        let mut ctxs = stack.contexts();
        assert_eq!(ctxs.len(), 2);
        stack.pre_read(&mut ctxs);

        assert_eq!(*a.calls.lock().unwrap(), vec!["pre_read"]);
        assert_eq!(*b.calls.lock().unwrap(), vec!["pre_read"]);
    }

    #[test]
    fn empty_stack_is_a_no_op() {
        let stack = HandlerStack::new();
        let mut ctxs = stack.contexts();
        assert!(ctxs.is_empty());
        stack.pre_read(&mut ctxs);
        stack.done(&mut ctxs);
    }
}
