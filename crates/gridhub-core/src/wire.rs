//! gridhub wire format — the household line protocol.
//!
//! Requests are plain UTF-8 text with no length prefix and no terminator:
//! one socket read is one request. Several requests may share a read when
//! separated by `;` or a newline. Fields are comma-separated and the first
//! field is a three-letter header.
//!
//! Responses mirror the request header and always end in `;`:
//!
//!   rni                          → pni,<node_id>;     (-1 = no node leased)
//!   rql,<node_id>                → par,<amperage>;
//!   rlc,<a1>,<a2>,<a3>,<b>,<s>,<offer> → plc,<value>;
//!
//! Request-level failures without a numeric answer use `err,<code>;`.
//! Anything that does not decode is a protocol violation: the caller drops
//! the connection without replying.

use crate::grid::{NodeId, TradeRequest};

/// Largest request a single read may carry.
pub const MAX_FRAME_LEN: usize = 1024;

/// Response terminator.
pub const TERMINATOR: char = ';';

// ── Headers ───────────────────────────────────────────────────────────────────

pub mod headers {
    pub const REQUEST_NODE_IDENTITY: &str = "rni";
    pub const REQUEST_LOAD: &str = "rql";
    pub const REQUEST_LOAD_CALCULATION: &str = "rlc";

    pub const PROVIDE_NODE_IDENTITY: &str = "pni";
    pub const PROVIDE_AMPERAGE_READING: &str = "par";
    pub const PROVIDE_LOAD_CALCULATION: &str = "plc";
    pub const ERROR: &str = "err";
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// A decoded household request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// `rni` — lease a node for the requesting peer.
    RequestNodeIdentity,
    /// `rql` — current amperage of a node.
    RequestLoad { node_id: NodeId },
    /// `rlc` — settlement estimate for a trade.
    RequestTradeEstimate(TradeRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("frame exceeds the maximum request length")]
    TooLong,
    #[error("unknown header {0:?}")]
    UnknownHeader(String),
    #[error("{header}: missing field {field}")]
    MissingField {
        header: &'static str,
        field: &'static str,
    },
    #[error("{header}: expected {expected} fields, got {got}")]
    FieldCount {
        header: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{field}: malformed value {value:?}")]
    Malformed { field: &'static str, value: String },
}

impl Request {
    /// Decode one frame.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        let frame = frame.trim();
        if frame.is_empty() {
            return Err(DecodeError::Empty);
        }

        let mut fields = frame.split(',').map(str::trim);
        let header = fields.next().unwrap_or_default();

        match header {
            headers::REQUEST_NODE_IDENTITY => Ok(Request::RequestNodeIdentity),
            headers::REQUEST_LOAD => {
                let node_id = fields.next().ok_or(DecodeError::MissingField {
                    header: headers::REQUEST_LOAD,
                    field: "node_id",
                })?;
                Ok(Request::RequestLoad {
                    node_id: parse_node_id("node_id", node_id)?,
                })
            }
            headers::REQUEST_LOAD_CALCULATION => {
                let values: Vec<&str> = fields.collect();
                if values.len() != 6 {
                    return Err(DecodeError::FieldCount {
                        header: headers::REQUEST_LOAD_CALCULATION,
                        expected: 6,
                        got: values.len(),
                    });
                }
                Ok(Request::RequestTradeEstimate(TradeRequest {
                    reported_amperages: [
                        parse_number("amp1", values[0])?,
                        parse_number("amp2", values[1])?,
                        parse_number("amp3", values[2])?,
                    ],
                    buyer_node_id: parse_node_id("buyer_index", values[3])?,
                    seller_node_id: parse_node_id("seller_index", values[4])?,
                    offer: parse_number("offer", values[5])?,
                }))
            }
            other => Err(DecodeError::UnknownHeader(other.to_string())),
        }
    }
}

fn parse_node_id(field: &'static str, value: &str) -> Result<NodeId, DecodeError> {
    value.parse::<NodeId>().map_err(|_| DecodeError::Malformed {
        field,
        value: value.to_string(),
    })
}

fn parse_number(field: &'static str, value: &str) -> Result<f64, DecodeError> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DecodeError::Malformed {
            field,
            value: value.to_string(),
        }),
    }
}

/// Split one socket read into request frames.
///
/// Fails only when the bytes are not UTF-8 or exceed `MAX_FRAME_LEN`.
/// Empty pieces between separators are skipped; a read with no content at
/// all yields no frames.
pub fn split_frames(bytes: &[u8]) -> Result<Vec<&str>, DecodeError> {
    if bytes.len() > MAX_FRAME_LEN {
        return Err(DecodeError::TooLong);
    }
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
    Ok(text
        .split(|c: char| c == TERMINATOR || c == '\n')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect())
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// Request-level failure reported back to the household.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// `rql` named a node with no load record.
    UnknownNode,
    /// The estimation engine failed or is not running.
    EstimationUnavailable,
    /// `rlc` named a buyer or seller that carries no load.
    InvalidTrade,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnknownNode => "unknown_node",
            ErrorCode::EstimationUnavailable => "estimation_unavailable",
            ErrorCode::InvalidTrade => "invalid_trade",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `None` is encoded as the `-1` sentinel.
    NodeIdentity(Option<NodeId>),
    Amperage(f64),
    TradeEstimate(f64),
    Error(ErrorCode),
}

impl Response {
    pub fn encode(&self) -> String {
        match self {
            Response::NodeIdentity(Some(id)) => {
                format!("{},{}{TERMINATOR}", headers::PROVIDE_NODE_IDENTITY, id)
            }
            Response::NodeIdentity(None) => {
                format!("{},-1{TERMINATOR}", headers::PROVIDE_NODE_IDENTITY)
            }
            Response::Amperage(a) => {
                format!("{},{}{TERMINATOR}", headers::PROVIDE_AMPERAGE_READING, a)
            }
            Response::TradeEstimate(v) => {
                format!("{},{}{TERMINATOR}", headers::PROVIDE_LOAD_CALCULATION, v)
            }
            Response::Error(code) => {
                format!("{},{}{TERMINATOR}", headers::ERROR, code.as_str())
            }
        }
    }
}
