//! Frame dispatcher (spec §4.A): splits a byte chunk into newline-delimited
//! commands, preserving order, and fans each one to a stack of listeners.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::session::Session;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A listener stack entry: `(payload, session) -> ()`. Handlers never
/// signal "handled" — both the router and a turn listener run their
/// matched verb (or silently ignore) every time (spec §4.A).
pub type Handler = Arc<dyn Fn(String, Arc<Session>) -> BoxFuture + Send + Sync>;

/// Accumulates partial reads and yields complete, order-preserved lines.
#[derive(Default)]
pub struct FrameSplitter {
    buf: Vec<u8>,
}

impl FrameSplitter {
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // drop the newline
            if let Ok(s) = String::from_utf8(line) {
                lines.push(s);
            }
        }
        lines
    }
}
