//! Length-framed request/reply codec spoken with the responder daemon.
//!
//! Every frame starts with a fixed 28 byte big-endian header followed by `datalen` body bytes.
//! Strings in bodies are NUL-terminated.

use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Protocol version written in and expected from every header.
pub const VERSION: u32 = 1;
/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 28;
/// Frames announcing a larger body are rejected.
pub const MAX_FRAME_BODY: usize = 70_000;

const REPLY_PREFIX_LEN: usize = 12;

/// Operation codes sent by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestOp {
    EnumerateDomains = 4,
    Register = 5,
    Browse = 6,
    Resolve = 7,
    Cancel = 63,
}

impl RequestOp {
    pub fn from_u32(op: u32) -> Option<Self> {
        match op {
            4 => Some(RequestOp::EnumerateDomains),
            5 => Some(RequestOp::Register),
            6 => Some(RequestOp::Browse),
            7 => Some(RequestOp::Resolve),
            63 => Some(RequestOp::Cancel),
            _ => None,
        }
    }
}

/// Operation codes sent by the daemon.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplyOp {
    DomainEnum = 64,
    Register = 65,
    Browse = 66,
    Resolve = 67,
}

impl ReplyOp {
    pub fn from_u32(op: u32) -> Option<Self> {
        match op {
            64 => Some(ReplyOp::DomainEnum),
            65 => Some(ReplyOp::Register),
            66 => Some(ReplyOp::Browse),
            67 => Some(ReplyOp::Resolve),
            _ => None,
        }
    }
}

/// The fixed frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, new)]
pub struct Header {
    pub version: u32,
    pub datalen: u32,
    pub ipc_flags: u32,
    pub op: u32,
    pub client_context: u64,
    pub reg_index: u32,
}

impl Header {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.version);
        buf.put_u32(self.datalen);
        buf.put_u32(self.ipc_flags);
        buf.put_u32(self.op);
        buf.put_u64(self.client_context);
        buf.put_u32(self.reg_index);
    }

    /// Reads a header from the front of `buf`, which must hold at least `HEADER_LEN` bytes.
    fn decode(mut buf: &[u8]) -> Self {
        Self {
            version: buf.get_u32(),
            datalen: buf.get_u32(),
            ipc_flags: buf.get_u32(),
            op: buf.get_u32(),
            client_context: buf.get_u64(),
            reg_index: buf.get_u32(),
        }
    }
}

/// One complete frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub body: Bytes,
}

impl Frame {
    /// Builds a frame for `op` addressed to `context`.
    pub fn new(op: u32, context: u64, body: Bytes) -> Self {
        Self {
            header: Header::new(VERSION, body.len() as u32, 0, op, context, 0),
            body,
        }
    }

    pub fn context(&self) -> u64 {
        self.header.client_context
    }

    /// Serializes this frame ready for writing to the socket.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        self.header.encode(&mut buf);
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

/// Reassembles frames from a byte stream delivered in arbitrary chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes received from the socket.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the number of buffered bytes not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if `next_frame()` would return without more input, either with a frame or
    /// with an error.
    pub fn has_frame(&self) -> bool {
        if self.buffer.len() < HEADER_LEN {
            return false;
        }

        let header = Header::decode(&self.buffer);
        let datalen = header.datalen as usize;

        header.version != VERSION
            || datalen > MAX_FRAME_BODY
            || self.buffer.len() >= HEADER_LEN + datalen
    }

    /// Removes and returns the next complete frame, or `None` if more input is needed.
    ///
    /// An error leaves the stream unrecoverable.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = Header::decode(&self.buffer);
        let datalen = header.datalen as usize;

        if header.version != VERSION {
            return Err(Error::Protocol(format!(
                "unsupported protocol version: {}",
                header.version
            )));
        }

        if datalen > MAX_FRAME_BODY {
            return Err(Error::Protocol(format!(
                "frame body of {datalen} bytes exceeds maximum of {MAX_FRAME_BODY}"
            )));
        }

        if self.buffer.len() < HEADER_LEN + datalen {
            return Ok(None);
        }

        self.buffer.advance(HEADER_LEN);
        let body = self.buffer.split_to(datalen).freeze();

        Ok(Some(Frame { header, body }))
    }
}

/// A request written to the daemon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    EnumerateDomains {
        flags: u32,
        interface_index: u32,
    },
    Browse {
        flags: u32,
        interface_index: u32,
        regtype: String,
        domain: String,
    },
    Resolve {
        flags: u32,
        interface_index: u32,
        name: String,
        regtype: String,
        domain: String,
    },
    Register {
        flags: u32,
        interface_index: u32,
        name: String,
        regtype: String,
        domain: String,
        host: String,
        port: u16,
        txt: Vec<u8>,
    },
    Cancel,
}

impl Request {
    pub fn op(&self) -> RequestOp {
        match self {
            Request::EnumerateDomains { .. } => RequestOp::EnumerateDomains,
            Request::Browse { .. } => RequestOp::Browse,
            Request::Resolve { .. } => RequestOp::Resolve,
            Request::Register { .. } => RequestOp::Register,
            Request::Cancel => RequestOp::Cancel,
        }
    }

    /// Encodes this request as a frame addressed to `context`.
    ///
    /// Fails with `Error::InvalidRequest` if a string contains a NUL byte or the TXT record does
    /// not fit its 16 bit length.
    pub fn to_frame(&self, context: u64) -> Result<Frame> {
        let mut body = BytesMut::new();

        match self {
            Request::EnumerateDomains {
                flags,
                interface_index,
            } => {
                body.put_u32(*flags);
                body.put_u32(*interface_index);
            }
            Request::Browse {
                flags,
                interface_index,
                regtype,
                domain,
            } => {
                body.put_u32(*flags);
                body.put_u32(*interface_index);
                put_string(&mut body, regtype)?;
                put_string(&mut body, domain)?;
            }
            Request::Resolve {
                flags,
                interface_index,
                name,
                regtype,
                domain,
            } => {
                body.put_u32(*flags);
                body.put_u32(*interface_index);
                put_string(&mut body, name)?;
                put_string(&mut body, regtype)?;
                put_string(&mut body, domain)?;
            }
            Request::Register {
                flags,
                interface_index,
                name,
                regtype,
                domain,
                host,
                port,
                txt,
            } => {
                let txt_len = u16::try_from(txt.len()).map_err(|_| {
                    Error::InvalidRequest(format!("TXT record of {} bytes", txt.len()))
                })?;

                body.put_u32(*flags);
                body.put_u32(*interface_index);
                put_string(&mut body, name)?;
                put_string(&mut body, regtype)?;
                put_string(&mut body, domain)?;
                put_string(&mut body, host)?;
                body.put_u16(*port);
                body.put_u16(txt_len);
                body.put_slice(txt);
            }
            Request::Cancel => {}
        }

        if body.len() > MAX_FRAME_BODY {
            return Err(Error::InvalidRequest(format!(
                "request body of {} bytes exceeds maximum of {MAX_FRAME_BODY}",
                body.len()
            )));
        }

        Ok(Frame::new(self.op() as u32, context, body.freeze()))
    }

    /// Decodes a request frame. This is the daemon side of the protocol.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let op = RequestOp::from_u32(frame.header.op)
            .ok_or_else(|| Error::Protocol(format!("unknown request op: {}", frame.header.op)))?;

        let mut body = frame.body.clone();

        let request = match op {
            RequestOp::EnumerateDomains => Request::EnumerateDomains {
                flags: get_u32(&mut body)?,
                interface_index: get_u32(&mut body)?,
            },
            RequestOp::Browse => Request::Browse {
                flags: get_u32(&mut body)?,
                interface_index: get_u32(&mut body)?,
                regtype: get_string(&mut body)?,
                domain: get_string(&mut body)?,
            },
            RequestOp::Resolve => Request::Resolve {
                flags: get_u32(&mut body)?,
                interface_index: get_u32(&mut body)?,
                name: get_string(&mut body)?,
                regtype: get_string(&mut body)?,
                domain: get_string(&mut body)?,
            },
            RequestOp::Register => {
                let flags = get_u32(&mut body)?;
                let interface_index = get_u32(&mut body)?;
                let name = get_string(&mut body)?;
                let regtype = get_string(&mut body)?;
                let domain = get_string(&mut body)?;
                let host = get_string(&mut body)?;
                let port = get_u16(&mut body)?;
                let txt_len = get_u16(&mut body)? as usize;
                let txt = get_slice(&mut body, txt_len)?;

                Request::Register {
                    flags,
                    interface_index,
                    name,
                    regtype,
                    domain,
                    host,
                    port,
                    txt,
                }
            }
            RequestOp::Cancel => Request::Cancel,
        };

        Ok(request)
    }
}

/// The operation specific part of a reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyBody {
    DomainEnum {
        domain: String,
    },
    Browse {
        name: String,
        regtype: String,
        domain: String,
    },
    Register {
        name: String,
        regtype: String,
        domain: String,
    },
    Resolve {
        fullname: String,
        target: String,
        port: u16,
        txt: Vec<u8>,
    },
}

impl ReplyBody {
    pub fn op(&self) -> ReplyOp {
        match self {
            ReplyBody::DomainEnum { .. } => ReplyOp::DomainEnum,
            ReplyBody::Browse { .. } => ReplyOp::Browse,
            ReplyBody::Register { .. } => ReplyOp::Register,
            ReplyBody::Resolve { .. } => ReplyOp::Resolve,
        }
    }
}

/// A decoded reply frame. The body is decoded on demand so that a malformed body can be
/// reported to the transaction it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyFrame {
    pub op: ReplyOp,
    pub context: u64,
    pub flags: u32,
    pub interface_index: u32,
    pub error: i32,
    rest: Bytes,
}

impl ReplyFrame {
    /// Decodes the reply op and the fields common to every reply.
    pub fn parse(frame: &Frame) -> Result<Self> {
        let op = ReplyOp::from_u32(frame.header.op)
            .ok_or_else(|| Error::Protocol(format!("unknown reply op: {}", frame.header.op)))?;

        if frame.body.len() < REPLY_PREFIX_LEN {
            return Err(Error::Protocol(format!(
                "reply body of {} bytes is too short",
                frame.body.len()
            )));
        }

        let mut body = frame.body.clone();

        Ok(Self {
            op,
            context: frame.context(),
            flags: body.get_u32(),
            interface_index: body.get_u32(),
            error: body.get_i32(),
            rest: body,
        })
    }

    /// Decodes the operation specific fields.
    pub fn body(&self) -> Result<ReplyBody> {
        let mut rest = self.rest.clone();

        let body = match self.op {
            ReplyOp::DomainEnum => ReplyBody::DomainEnum {
                domain: get_string(&mut rest)?,
            },
            ReplyOp::Browse => ReplyBody::Browse {
                name: get_string(&mut rest)?,
                regtype: get_string(&mut rest)?,
                domain: get_string(&mut rest)?,
            },
            ReplyOp::Register => ReplyBody::Register {
                name: get_string(&mut rest)?,
                regtype: get_string(&mut rest)?,
                domain: get_string(&mut rest)?,
            },
            ReplyOp::Resolve => {
                let fullname = get_string(&mut rest)?;
                let target = get_string(&mut rest)?;
                let port = get_u16(&mut rest)?;
                let txt_len = get_u16(&mut rest)? as usize;
                let txt = get_slice(&mut rest, txt_len)?;

                ReplyBody::Resolve {
                    fullname,
                    target,
                    port,
                    txt,
                }
            }
        };

        Ok(body)
    }
}

/// Encodes a reply frame. This is the daemon side of the protocol.
pub fn encode_reply(
    context: u64,
    flags: u32,
    interface_index: u32,
    error: i32,
    reply: &ReplyBody,
) -> Result<Frame> {
    let mut body = BytesMut::new();

    body.put_u32(flags);
    body.put_u32(interface_index);
    body.put_i32(error);

    match reply {
        ReplyBody::DomainEnum { domain } => put_string(&mut body, domain)?,
        ReplyBody::Browse {
            name,
            regtype,
            domain,
        }
        | ReplyBody::Register {
            name,
            regtype,
            domain,
        } => {
            put_string(&mut body, name)?;
            put_string(&mut body, regtype)?;
            put_string(&mut body, domain)?;
        }
        ReplyBody::Resolve {
            fullname,
            target,
            port,
            txt,
        } => {
            let txt_len = u16::try_from(txt.len()).map_err(|_| {
                Error::InvalidRequest(format!("TXT record of {} bytes", txt.len()))
            })?;

            put_string(&mut body, fullname)?;
            put_string(&mut body, target)?;
            body.put_u16(*port);
            body.put_u16(txt_len);
            body.put_slice(txt);
        }
    }

    Ok(Frame::new(reply.op() as u32, context, body.freeze()))
}

fn put_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(Error::InvalidRequest(format!(
            "string contains a NUL byte: {s:?}"
        )));
    }

    buf.put_slice(s.as_bytes());
    buf.put_u8(0);

    Ok(())
}

fn get_string(buf: &mut Bytes) -> Result<String> {
    let end = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| Error::Protocol("unterminated string".to_string()))?;

    let raw = buf.split_to(end);
    buf.advance(1);

    String::from_utf8(raw.to_vec())
        .map_err(|_| Error::Protocol("string is not valid UTF-8".to_string()))
}

fn get_u32(buf: &mut Bytes) -> Result<u32> {
    ensure_remaining(buf, 4)?;
    Ok(buf.get_u32())
}

fn get_u16(buf: &mut Bytes) -> Result<u16> {
    ensure_remaining(buf, 2)?;
    Ok(buf.get_u16())
}

fn get_slice(buf: &mut Bytes, len: usize) -> Result<Vec<u8>> {
    ensure_remaining(buf, len)?;
    Ok(buf.split_to(len).to_vec())
}

fn ensure_remaining(buf: &Bytes, len: usize) -> Result<()> {
    if buf.remaining() < len {
        Err(Error::Protocol(format!(
            "truncated body: needed {len} bytes, {} remaining",
            buf.remaining()
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browse_reply() -> ReplyBody {
        ReplyBody::Browse {
            name: "printer".into(),
            regtype: "_ipp._tcp.".into(),
            domain: "local.".into(),
        }
    }

    #[test]
    fn header_layout_is_big_endian() {
        let frame = Frame::new(RequestOp::Cancel as u32, 0x0102030405060708, Bytes::new());
        let bytes = frame.to_bytes();

        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 63]);
        assert_eq!(&bytes[16..24], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn decoder_reassembles_split_frames() {
        let first = encode_reply(1, 0x2, 0, 0, &browse_reply()).unwrap().to_bytes();
        let second = encode_reply(2, 0, 0, 0, &browse_reply()).unwrap().to_bytes();

        let mut stream = first.to_vec();
        stream.extend_from_slice(&second);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream[..10]);
        assert!(!decoder.has_frame());
        assert_eq!(decoder.next_frame().unwrap(), None);

        decoder.extend(&stream[10..first.len() + 3]);
        assert!(decoder.has_frame());
        assert_eq!(decoder.next_frame().unwrap().unwrap().context(), 1);
        assert!(!decoder.has_frame());

        decoder.extend(&stream[first.len() + 3..]);
        assert_eq!(decoder.next_frame().unwrap().unwrap().context(), 2);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn decoder_rejects_oversized_body() {
        let mut header = BytesMut::new();
        Header::new(VERSION, (MAX_FRAME_BODY + 1) as u32, 0, 66, 1, 0).encode(&mut header);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&header);

        assert!(decoder.has_frame());
        assert!(matches!(decoder.next_frame(), Err(Error::Protocol(_))));
    }

    #[test]
    fn decoder_rejects_bad_version() {
        let mut header = BytesMut::new();
        Header::new(2, 0, 0, 66, 1, 0).encode(&mut header);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&header);

        assert!(matches!(decoder.next_frame(), Err(Error::Protocol(_))));
    }

    #[test]
    fn register_request_layout() {
        let request = Request::Register {
            flags: 0x8,
            interface_index: 0,
            name: "".into(),
            regtype: "_http._tcp".into(),
            domain: "".into(),
            host: "".into(),
            port: 8080,
            txt: vec![3, b'a', b'=', b'b'],
        };

        let frame = request.to_frame(9).unwrap();

        assert_eq!(frame.header.op, RequestOp::Register as u32);
        assert_eq!(frame.header.datalen as usize, frame.body.len());
        assert_eq!(
            &frame.body[..],
            b"\0\0\0\x08\0\0\0\0\0_http._tcp\0\0\0\x1f\x90\0\x04\x03a=b"
        );
        assert_eq!(Request::from_frame(&frame).unwrap(), request);
    }

    #[test]
    fn request_rejects_nul_in_string() {
        let request = Request::Browse {
            flags: 0,
            interface_index: 0,
            regtype: "_http._tcp".into(),
            domain: "loc\0al".into(),
        };

        assert!(matches!(
            request.to_frame(1),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn resolve_reply_fields() {
        let reply = ReplyBody::Resolve {
            fullname: "Dr\\.\\032Pepper._http._tcp.local.".into(),
            target: "host.local.".into(),
            port: 631,
            txt: vec![4, b'k', b'1', b'=', b'1'],
        };

        let frame = encode_reply(5, 0x1, 3, 0, &reply).unwrap();
        let parsed = ReplyFrame::parse(&frame).unwrap();

        assert_eq!(parsed.op, ReplyOp::Resolve);
        assert_eq!(parsed.context, 5);
        assert_eq!(parsed.flags, 0x1);
        assert_eq!(parsed.interface_index, 3);
        assert_eq!(parsed.error, 0);
        assert_eq!(parsed.body().unwrap(), reply);
    }

    #[test]
    fn reply_body_truncation_is_reported() {
        let frame = encode_reply(5, 0, 0, 0, &browse_reply()).unwrap();
        let truncated = Frame::new(
            frame.header.op,
            5,
            frame.body.slice(..frame.body.len() - 3),
        );

        let parsed = ReplyFrame::parse(&truncated).unwrap();
        assert!(matches!(parsed.body(), Err(Error::Protocol(_))));
    }

    #[test]
    fn unknown_reply_op_is_rejected() {
        let frame = Frame::new(99, 1, Bytes::from_static(&[0; 12]));
        assert!(matches!(ReplyFrame::parse(&frame), Err(Error::Protocol(_))));
    }

    #[test]
    fn error_reply_prefix_is_readable() {
        let frame = encode_reply(
            7,
            0,
            0,
            -65548,
            &ReplyBody::Register {
                name: "".into(),
                regtype: "".into(),
                domain: "".into(),
            },
        )
        .unwrap();

        assert_eq!(ReplyFrame::parse(&frame).unwrap().error, -65548);
    }
}
