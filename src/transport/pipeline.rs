//! Generic layer stacking over [`crate::transport::Connection`]/
//! [`crate::transport::Listener`].
//!
//! [`Layer`], [`LayeredConnection`], and [`LayeredListener`] are the hook a
//! TLS (or any other protocol-on-top-of-a-stream) binding would plug into:
//! wrap a `Box<dyn Connection>`/`Box<dyn Listener>`, transform bytes in
//! [`Layer::on_read`]/[`Layer::on_write`], and the result is itself a
//! `Connection`/`Listener`, stackable again. [`XorLayer`] is a toy instance
//! used by this module's own tests; it is not meant to be
//! security-relevant.

use crate::error::Result;
use crate::transport::{Connection, Listener};
use std::cell::RefCell;
use std::rc::Rc;

/// A protocol layer stacked above a raw stream. `on_read` transforms
/// inbound bytes before the caller's `on_read` sees them; `on_write`
/// transforms outbound bytes before they reach the lower connection.
pub trait Layer: 'static {
    fn on_read(&mut self, data: &[u8]) -> Vec<u8>;
    fn on_write(&mut self, data: Vec<u8>) -> Vec<u8>;
}

/// A [`Connection`] that runs every byte through a [`Layer`] before handing
/// it to (reads) or accepting it from (writes) the wrapped connection.
pub struct LayeredConnection<L: Layer> {
    inner: Box<dyn Connection>,
    layer: Rc<RefCell<L>>,
}

impl<L: Layer> LayeredConnection<L> {
    pub fn new(inner: Box<dyn Connection>, layer: L) -> LayeredConnection<L> {
        LayeredConnection { inner, layer: Rc::new(RefCell::new(layer)) }
    }
}

impl<L: Layer> Connection for LayeredConnection<L> {
    fn read_start(&mut self, mut on_read: Box<dyn FnMut(Result<&[u8]>)>) -> Result<()> {
        let layer = self.layer.clone();
        self.inner.read_start(Box::new(move |res| match res {
            Ok(data) => {
                let transformed = layer.borrow_mut().on_read(data);
                on_read(Ok(&transformed));
            }
            Err(e) => on_read(Err(e)),
        }))
    }

    fn read_stop(&mut self) -> Result<()> {
        self.inner.read_stop()
    }

    fn write(&mut self, buf: Vec<u8>, on_write: Box<dyn FnOnce(Result<usize>)>) -> Result<()> {
        let transformed = self.layer.borrow_mut().on_write(buf);
        let original_len = transformed.len();
        self.inner.write(
            transformed,
            Box::new(move |res| on_write(res.map(|_| original_len))),
        )
    }

    fn shutdown(&mut self, on_shutdown: Box<dyn FnOnce(Result<()>)>) -> Result<()> {
        self.inner.shutdown(on_shutdown)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

/// A [`Listener`] that wraps every accepted connection in a fresh
/// [`LayeredConnection`], constructing one [`Layer`] instance per
/// connection via `make_layer` (e.g. a TLS binding would hand this a
/// closure that derives a fresh per-connection session from a shared
/// config/context).
pub struct LayeredListener<F> {
    inner: Box<dyn Listener>,
    make_layer: Option<F>,
}

impl<L, F> LayeredListener<F>
where
    L: Layer,
    F: Fn() -> L + 'static,
{
    pub fn new(inner: Box<dyn Listener>, make_layer: F) -> LayeredListener<F> {
        LayeredListener { inner, make_layer: Some(make_layer) }
    }
}

impl<L, F> Listener for LayeredListener<F>
where
    L: Layer,
    F: Fn() -> L + 'static,
{
    fn listen(
        &mut self,
        addr: std::net::SocketAddr,
        backlog: u32,
        mut on_accept: Box<dyn FnMut(Result<Box<dyn Connection>>)>,
    ) -> Result<()> {
        let make_layer = self.make_layer.take().ok_or(crate::error::Error::State)?;
        self.inner.listen(
            addr,
            backlog,
            Box::new(move |res| match res {
                Ok(conn) => {
                    let layered = LayeredConnection::new(conn, make_layer());
                    on_accept(Ok(Box::new(layered)));
                }
                Err(e) => on_accept(Err(e)),
            }),
        )
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

/// A toy XOR "cipher" layer, used only by this module's tests to exercise
/// [`LayeredConnection`]'s read/write transform plumbing end to end. Not a
/// real cipher and not meant to be used as one.
pub struct XorLayer {
    key: u8,
}

impl XorLayer {
    pub fn new(key: u8) -> XorLayer {
        XorLayer { key }
    }
}

impl Layer for XorLayer {
    fn on_read(&mut self, data: &[u8]) -> Vec<u8> {
        data.iter().map(|b| b ^ self.key).collect()
    }

    fn on_write(&mut self, data: Vec<u8>) -> Vec<u8> {
        data.into_iter().map(|b| b ^ self.key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    type ReadSlot = Rc<RefCell<Option<Box<dyn FnMut(Result<&[u8]>)>>>>;

    /// A minimal stand-in for a real transport, exposing its stored
    /// `on_read` callback (via `read_slot`) so the test can drive it
    /// directly, the way a readiness event would.
    struct FakeConnection {
        read_slot: ReadSlot,
        last_write: Rc<RefCell<Vec<u8>>>,
    }

    impl Connection for FakeConnection {
        fn read_start(&mut self, on_read: Box<dyn FnMut(Result<&[u8]>)>) -> Result<()> {
            *self.read_slot.borrow_mut() = Some(on_read);
            Ok(())
        }
        fn read_stop(&mut self) -> Result<()> {
            *self.read_slot.borrow_mut() = None;
            Ok(())
        }
        fn write(&mut self, buf: Vec<u8>, on_write: Box<dyn FnOnce(Result<usize>)>) -> Result<()> {
            let n = buf.len();
            *self.last_write.borrow_mut() = buf;
            on_write(Ok(n));
            Ok(())
        }
        fn shutdown(&mut self, on_shutdown: Box<dyn FnOnce(Result<()>)>) -> Result<()> {
            on_shutdown(Ok(()));
            Ok(())
        }
        fn close(&mut self) {
            *self.read_slot.borrow_mut() = None;
        }
    }

    #[test]
    fn xor_layer_round_trips_through_write() {
        let last_write = Rc::new(RefCell::new(Vec::new()));
        let read_slot: ReadSlot = Rc::new(RefCell::new(None));
        let fake = FakeConnection { read_slot, last_write: last_write.clone() };
        let mut layered = LayeredConnection::new(Box::new(fake), XorLayer::new(0x5a));

        layered.write(vec![1, 2, 3], Box::new(|res| assert_eq!(res.unwrap(), 3))).unwrap();
        assert_eq!(*last_write.borrow(), vec![1 ^ 0x5a, 2 ^ 0x5a, 3 ^ 0x5a]);
    }

    #[test]
    fn xor_layer_round_trips_through_read() {
        let last_write = Rc::new(RefCell::new(Vec::new()));
        let read_slot: ReadSlot = Rc::new(RefCell::new(None));
        let fake = FakeConnection { read_slot: read_slot.clone(), last_write };
        let mut layered = LayeredConnection::new(Box::new(fake), XorLayer::new(0x5a));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        layered
            .read_start(Box::new(move |res| {
                seen2.borrow_mut().extend_from_slice(res.unwrap());
            }))
            .unwrap();

        let ciphertext = vec![1 ^ 0x5au8, 2 ^ 0x5a, 3 ^ 0x5a];
        if let Some(cb) = read_slot.borrow_mut().as_mut() {
            cb(Ok(&ciphertext));
        }
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }
}
