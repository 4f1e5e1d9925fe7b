//! Passthrough traffic tracing.
//!
//! Insert anywhere in a stack to see what crosses that boundary. Output
//! goes to the logging shim at debug level; the layer is otherwise inert.

use super::Context;
use crate::error::ProtocolError;

/// Tracing layer.
pub struct Print {
    label: &'static str,
}

impl Default for Print {
    fn default() -> Self {
        Self::new("stack")
    }
}

impl Print {
    /// A tracing layer whose log lines carry `label`.
    pub fn new(label: &'static str) -> Self {
        Self { label }
    }

    fn trace(&self, dir: &str, data: &[u8], last: bool) {
        #[cfg(feature = "log")]
        log::debug!("{} {} {:02x?} last={}", self.label, dir, data, last);
        #[cfg(not(feature = "log"))]
        crate::fmt::debug!("{} bytes traced", data.len());
        #[cfg(not(feature = "log"))]
        let _ = (dir, last);
    }
}

impl super::Layer for Print {
    fn encode(
        &mut self,
        data: &[u8],
        last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        self.trace("tx", data, last);
        ctx.down(data, last);

        Ok(())
    }

    fn decode(
        &mut self,
        data: &[u8],
        last: bool,
        ctx: &mut Context<'_, '_, '_>,
    ) -> Result<(), ProtocolError> {
        self.trace("rx", data, last);
        ctx.up(data, last);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::harness::Capture;
    use super::super::{LayerKind, Stack};
    use super::*;

    #[test]
    fn transparent_in_both_directions() {
        let mut stack = Stack::new(alloc::vec![LayerKind::Print(Print::new("test"))], 0);
        let mut cap = Capture::default();

        cap.drive(|io| stack.encode(b"down", true, io)).unwrap();
        cap.drive(|io| stack.feed(b"up", true, io)).unwrap();

        assert_eq!(cap.down, [b"down".to_vec()]);
        assert_eq!(cap.up, [b"up".to_vec()]);
    }
}
