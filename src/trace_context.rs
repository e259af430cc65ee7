//! W3C trace-context propagation.
//!
//! A call adopts the caller's parent context (or starts a new trace) and each
//! physical attempt is sent with a fresh span id in the `traceparent` header.

use rand::Rng;

/// Name of the propagation header.
pub const TRACEPARENT: &str = "traceparent";

/// A parsed `traceparent` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: u128,
    span_id: u64,
    flags: u8,
}

impl TraceContext {
    /// Starts a new sampled trace with random identifiers.
    pub fn new_root() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            trace_id: rng.gen_range(1..=u128::MAX),
            span_id: rng.gen_range(1..=u64::MAX),
            flags: 0x01,
        }
    }

    /// Parses a `traceparent` header value (`00-{32hex}-{16hex}-{2hex}`).
    ///
    /// Returns `None` for malformed values and for the all-zero ids the
    /// format declares invalid.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some()
            || version != "00"
            || trace_id.len() != 32
            || span_id.len() != 16
            || flags.len() != 2
            || ![trace_id, span_id, flags].iter().all(|field| is_lower_hex(field))
        {
            return None;
        }

        let trace_id = u128::from_str_radix(trace_id, 16).ok()?;
        let span_id = u64::from_str_radix(span_id, 16).ok()?;
        let flags = u8::from_str_radix(flags, 16).ok()?;
        if trace_id == 0 || span_id == 0 {
            return None;
        }
        Some(Self {
            trace_id,
            span_id,
            flags,
        })
    }

    /// Returns a context in the same trace with a new span id.
    pub fn child(&self) -> Self {
        Self {
            span_id: rand::thread_rng().gen_range(1..=u64::MAX),
            ..*self
        }
    }

    /// The trace id as 32 lowercase hex characters.
    pub fn trace_id(&self) -> String {
        format!("{:032x}", self.trace_id)
    }

    /// The span id as 16 lowercase hex characters.
    pub fn span_id(&self) -> String {
        format!("{:016x}", self.span_id)
    }

    /// Returns `true` if the sampled flag is set.
    pub fn is_sampled(&self) -> bool {
        self.flags & 0x01 != 0
    }

    /// Formats the context as a `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        format!(
            "00-{:032x}-{:016x}-{:02x}",
            self.trace_id, self.span_id, self.flags
        )
    }
}

fn is_lower_hex(field: &str) -> bool {
    field.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let ctx = TraceContext::parse("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")
            .unwrap();
        assert_eq!(ctx.trace_id(), "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(ctx.span_id(), "b7ad6b7169203331");
        assert!(ctx.is_sampled());
        assert_eq!(
            ctx.to_traceparent(),
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!(TraceContext::parse("").is_none());
        assert!(TraceContext::parse("00-abc-def-01").is_none());
        assert!(TraceContext::parse(
            "01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
        )
        .is_none());
        assert!(TraceContext::parse(
            "00-00000000000000000000000000000000-b7ad6b7169203331-01"
        )
        .is_none());
        assert!(TraceContext::parse(
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01-extra"
        )
        .is_none());
    }

    #[test]
    fn test_parse_rejects_non_lowercase_hex() {
        for value in [
            "00-+af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            "00-0AF7651916CD43DD8448EB211C80319C-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-+7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-+1",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b716920333g-01",
        ] {
            assert!(TraceContext::parse(value).is_none(), "{value}");
        }
    }

    #[test]
    fn test_child_keeps_trace() {
        let root = TraceContext::new_root();
        let child = root.child();
        assert_eq!(root.trace_id(), child.trace_id());
        assert_ne!(root.span_id(), child.span_id());
        assert_eq!(TraceContext::parse(&child.to_traceparent()), Some(child));
    }
}
