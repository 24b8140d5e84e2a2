//! Beam transfer protocol reference implementation.
//! Sans-I/O: the daemon owns sockets and files; this crate owns bytes.

pub mod etag;
pub mod meta;
pub mod mime;
pub mod range;
pub mod request;
pub mod response;

pub use meta::{MetaDocument, META_FILE_NAME};
pub use range::{parse_range_header, ByteRange, RangeOutcome};
pub use request::{
    decode_percent, find_header_end, parse_request_head, Method, Request, HEADER_BUF_SIZE,
};
pub use response::{
    encode_response_head, parse_response_head, HttpError, ResponseHead, Status,
};
