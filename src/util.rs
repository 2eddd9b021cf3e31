use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::error::StreamError;
use crate::protocol::mapping::Vendor;

static CALL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
const HEX: &[u8; 16] = b"0123456789abcdef";

#[inline]
pub(crate) fn next_call_id() -> String {
    let id = CALL_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut out = String::with_capacity(21);
    out.push_str("call_");
    push_u64_hex_16(&mut out, id);
    out
}

#[inline]
fn push_u64_hex_16(out: &mut String, mut value: u64) {
    let mut buf = [b'0'; 16];
    let mut idx = 16;
    while idx > 0 {
        idx -= 1;
        let nibble = usize::try_from(value & 0x0f).unwrap_or(0);
        buf[idx] = HEX[nibble];
        value >>= 4;
    }
    for byte in buf {
        out.push(char::from(byte));
    }
}

/// Classification of one line of a `data:`-framed event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataLine<'a> {
    /// Blank line, comment, or a field other than `data`.
    Ignore,
    /// The `[DONE]` sentinel.
    Done,
    Payload(&'a str),
}

#[inline]
pub(crate) fn classify_data_line(line: &str, allow_bare_json: bool) -> DataLine<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return DataLine::Ignore;
    }

    let payload = if let Some(rest) = trimmed.strip_prefix("data:") {
        rest.trim()
    } else if allow_bare_json && (trimmed.starts_with('{') || trimmed.starts_with('[')) {
        trimmed
    } else {
        // event:, id:, retry: and anything unrecognized.
        return DataLine::Ignore;
    };

    match payload {
        "" => DataLine::Ignore,
        "[DONE]" => DataLine::Done,
        payload => DataLine::Payload(payload),
    }
}

/// Build a [`StreamError::VendorReported`] from a vendor `error` object.
///
/// Vendors disagree on where the code lives (`code` as string or number,
/// `type`, `status`); the first one present wins.
pub(crate) fn vendor_error(vendor: Vendor, error: &Value) -> StreamError {
    let code = ["code", "type", "status"]
        .iter()
        .find_map(|field| match error.get(field) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "unknown".to_string());
    let message = match error.get("message") {
        Some(Value::String(s)) => s.clone(),
        _ => error.to_string(),
    };
    StreamError::VendorReported {
        vendor,
        code,
        message,
    }
}
