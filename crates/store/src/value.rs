//! Per-column value providers
//!
//! A column's value is produced in two steps: `len` returns an upper bound
//! used to size the allocation, then `write` appends the value and returns
//! how many bytes it wrote. A zero length means SQL NULL. Values longer
//! than [`MAX_FIELD_LEN`] are truncated.
//!
//! A handful of request attributes have dedicated fast paths; every other
//! column reads a named variable from the [`RequestContext`].

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Local};
use serde::Deserialize;

use crate::row::MAX_FIELD_LEN;

/// `28/Sep/1970:12:00:00 +0600`
const TIME_LOCAL_LEN: usize = 26;
/// `1970-09-28T12:00:00+06:00`
const TIME_ISO8601_LEN: usize = 25;
/// Decimal u64 plus room for `.mmm`
const NUMBER_LEN: usize = 20;
const MSEC_LEN: usize = NUMBER_LEN + 4;

/// Read access to one completed request
///
/// Implemented by the host for its request type.
pub trait RequestContext {
    /// Named request variable, `None` when unset
    fn variable(&self, name: &str) -> Option<Cow<'_, [u8]>>;

    /// Response status code
    fn status(&self) -> u16;

    /// Whether the request arrived pipelined
    fn pipelined(&self) -> bool {
        false
    }

    /// When the request started
    fn start_time(&self) -> SystemTime;

    /// Time the request is logged at
    fn log_time(&self) -> SystemTime {
        SystemTime::now()
    }

    /// Bytes sent to the client, headers included
    fn bytes_sent(&self) -> u64;

    /// Response body bytes sent to the client
    fn body_bytes_sent(&self) -> u64;

    /// Request length, line and headers included
    fn request_length(&self) -> u64;

    /// Client address
    fn remote_addr(&self) -> Option<IpAddr>;
}

/// Where a column's value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Client address as raw network-order octets
    BinaryRemoteAddr,
    /// `p` when pipelined, `.` otherwise
    Pipe,
    TimeLocal,
    TimeIso8601,
    /// Log time as `seconds.milliseconds`
    Msec,
    /// Elapsed request time as `seconds.milliseconds`
    RequestTime,
    /// Three-digit status
    Status,
    BytesSent,
    BodyBytesSent,
    RequestLength,
    /// Any other request variable
    Variable { name: String, escape: bool },
}

impl ValueSource {
    /// Provider for a column named after a request variable
    ///
    /// `escape` is false for columns bound as BLOB; their bytes are stored
    /// verbatim.
    pub fn for_variable(name: &str, escape: bool) -> Self {
        match name {
            "binary_remote_addr" => Self::BinaryRemoteAddr,
            "pipe" => Self::Pipe,
            "time_local" => Self::TimeLocal,
            "time_iso8601" => Self::TimeIso8601,
            "msec" => Self::Msec,
            "request_time" => Self::RequestTime,
            "status" => Self::Status,
            "bytes_sent" => Self::BytesSent,
            "body_bytes_sent" => Self::BodyBytesSent,
            "request_length" => Self::RequestLength,
            _ => Self::Variable {
                name: name.to_string(),
                escape,
            },
        }
    }

    /// Upper bound of the value length, zero for NULL
    pub fn len(&self, request: &dyn RequestContext) -> usize {
        match self {
            Self::BinaryRemoteAddr => match request.remote_addr() {
                Some(IpAddr::V4(_)) => 4,
                Some(IpAddr::V6(_)) => 16,
                None => 0,
            },
            Self::Pipe => 1,
            Self::TimeLocal => TIME_LOCAL_LEN,
            Self::TimeIso8601 => TIME_ISO8601_LEN,
            Self::Msec | Self::RequestTime => MSEC_LEN,
            Self::Status => 3.max(decimal_len(u64::from(request.status()))),
            Self::BytesSent | Self::BodyBytesSent | Self::RequestLength => NUMBER_LEN,
            Self::Variable { name, escape } => match request.variable(name) {
                Some(value) if *escape => value.len() + 3 * escaped_count(&value),
                Some(value) => value.len(),
                None => 0,
            },
        }
    }

    /// Append the value to `buf`, returning the number of bytes written
    pub fn write(&self, request: &dyn RequestContext, buf: &mut BytesMut) -> usize {
        let start = buf.len();
        match self {
            Self::BinaryRemoteAddr => match request.remote_addr() {
                Some(IpAddr::V4(ip)) => buf.put_slice(&ip.octets()),
                Some(IpAddr::V6(ip)) => buf.put_slice(&ip.octets()),
                None => {}
            },
            Self::Pipe => buf.put_u8(if request.pipelined() { b'p' } else { b'.' }),
            Self::TimeLocal => {
                let time: DateTime<Local> = request.log_time().into();
                put_fmt(buf, format_args!("{}", time.format("%d/%b/%Y:%H:%M:%S %z")));
            }
            Self::TimeIso8601 => {
                let time: DateTime<Local> = request.log_time().into();
                put_fmt(buf, format_args!("{}", time.format("%Y-%m-%dT%H:%M:%S%:z")));
            }
            Self::Msec => {
                let since_epoch = request
                    .log_time()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                put_millis(buf, since_epoch);
            }
            Self::RequestTime => {
                let elapsed = request
                    .log_time()
                    .duration_since(request.start_time())
                    .unwrap_or_default();
                put_millis(buf, elapsed);
            }
            Self::Status => put_fmt(buf, format_args!("{:03}", request.status())),
            Self::BytesSent => put_fmt(buf, format_args!("{}", request.bytes_sent())),
            Self::BodyBytesSent => put_fmt(buf, format_args!("{}", request.body_bytes_sent())),
            Self::RequestLength => put_fmt(buf, format_args!("{}", request.request_length())),
            Self::Variable { name, escape } => {
                if let Some(value) = request.variable(name) {
                    if *escape {
                        escape_into(&value, buf);
                    } else {
                        buf.put_slice(&value);
                    }
                }
            }
        }
        buf.len() - start
    }

    /// Length then value, truncated to [`MAX_FIELD_LEN`]; `None` is NULL
    pub fn evaluate(&self, request: &dyn RequestContext) -> Option<Bytes> {
        let len = self.len(request);
        if len == 0 {
            return None;
        }

        let mut buf = BytesMut::with_capacity(len);
        if self.write(request, &mut buf) == 0 {
            return None;
        }
        buf.truncate(MAX_FIELD_LEN);
        Some(buf.freeze())
    }
}

/// Predicate deciding whether a request is logged at all
///
/// Either a `$variable` reference or a literal. False when the value is
/// missing, empty, or `"0"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Variable(String),
    Literal(String),
}

impl Condition {
    pub fn parse(source: &str) -> Self {
        match source.strip_prefix('$') {
            Some(name) => Self::Variable(name.to_string()),
            None => Self::Literal(source.to_string()),
        }
    }

    pub fn evaluate(&self, request: &dyn RequestContext) -> bool {
        match self {
            Self::Variable(name) => request.variable(name).is_some_and(|v| is_truthy(&v)),
            Self::Literal(value) => is_truthy(value.as_bytes()),
        }
    }
}

fn is_truthy(value: &[u8]) -> bool {
    !value.is_empty() && value != b"0"
}

/// Bytes that are written as `\xHH`: controls, `"`, `\`, DEL and above
#[inline]
fn needs_escape(b: u8) -> bool {
    b < 0x20 || b == b'"' || b == b'\\' || b >= 0x7f
}

fn escaped_count(value: &[u8]) -> usize {
    value.iter().filter(|&&b| needs_escape(b)).count()
}

fn escape_into(value: &[u8], buf: &mut BytesMut) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    for &b in value {
        if needs_escape(b) {
            buf.put_slice(&[b'\\', b'x', HEX[usize::from(b >> 4)], HEX[usize::from(b & 0xf)]]);
        } else {
            buf.put_u8(b);
        }
    }
}

fn put_fmt(buf: &mut BytesMut, args: std::fmt::Arguments<'_>) {
    // BytesMut implements fmt::Write and never fails
    let _ = buf.write_fmt(args);
}

fn put_millis(buf: &mut BytesMut, d: Duration) {
    put_fmt(buf, format_args!("{}.{:03}", d.as_secs(), d.subsec_millis()));
}

fn decimal_len(mut n: u64) -> usize {
    let mut len = 1;
    while n >= 10 {
        n /= 10;
        len += 1;
    }
    len
}

/// An owned request, as read from a JSON lines replay file
///
/// Unknown keys become variables:
///
/// ```json
/// {"status": 200, "remote_addr": "10.0.0.1", "request": "GET / HTTP/1.1", "request_time": 0.012}
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestRecord {
    pub status: u16,
    pub pipelined: bool,
    pub remote_addr: Option<IpAddr>,
    pub bytes_sent: u64,
    pub body_bytes_sent: u64,
    pub request_length: u64,
    /// Seconds between request start and logging
    pub request_time: Option<f64>,
    /// Unix seconds the request is logged at, now when absent
    pub timestamp: Option<f64>,
    #[serde(flatten)]
    pub variables: HashMap<String, String>,
}

impl RequestRecord {
    /// Pin the log time to now if the record did not carry one, so every
    /// column of the row sees the same instant
    pub fn stamped(mut self) -> Self {
        if self.timestamp.is_none() {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            self.timestamp = Some(now.as_secs_f64());
        }
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

impl RequestContext for RequestRecord {
    fn variable(&self, name: &str) -> Option<Cow<'_, [u8]>> {
        if let Some(value) = self.variables.get(name) {
            return Some(Cow::Borrowed(value.as_bytes()));
        }
        let derived = match name {
            "remote_addr" => self.remote_addr?.to_string(),
            "status" => format!("{:03}", self.status),
            "bytes_sent" => self.bytes_sent.to_string(),
            "body_bytes_sent" => self.body_bytes_sent.to_string(),
            "request_length" => self.request_length.to_string(),
            _ => return None,
        };
        Some(Cow::Owned(derived.into_bytes()))
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn pipelined(&self) -> bool {
        self.pipelined
    }

    fn start_time(&self) -> SystemTime {
        let elapsed = self
            .request_time
            .filter(|t| t.is_finite() && *t >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_default();
        self.log_time().checked_sub(elapsed).unwrap_or(UNIX_EPOCH)
    }

    fn log_time(&self) -> SystemTime {
        match self.timestamp.filter(|t| t.is_finite() && *t >= 0.0) {
            Some(secs) => UNIX_EPOCH + Duration::from_secs_f64(secs),
            None => SystemTime::now(),
        }
    }

    fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn body_bytes_sent(&self) -> u64 {
        self.body_bytes_sent
    }

    fn request_length(&self) -> u64 {
        self.request_length
    }

    fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }
}

#[cfg(test)]
#[path = "value_test.rs"]
mod value_test;
