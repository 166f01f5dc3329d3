//! Minimal STUN message codec (RFC 5389).
//!
//! Only what the relay needs: decoding a request with its attributes,
//! checking and adding MESSAGE-INTEGRITY, and building Binding success
//! responses (XOR-MAPPED-ADDRESS) and 401 error responses (ERROR-CODE + REALM).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ring::hmac;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub const MAGIC_COOKIE: u32 = 0x2112_A442;
pub const HEADER_LEN: usize = 20;

pub const BINDING_REQUEST: u16 = 0x0001;
pub const BINDING_SUCCESS_RESPONSE: u16 = 0x0101;
pub const BINDING_ERROR_RESPONSE: u16 = 0x0111;

pub const ATTR_USERNAME: u16 = 0x0006;
pub const ATTR_MESSAGE_INTEGRITY: u16 = 0x0008;
pub const ATTR_ERROR_CODE: u16 = 0x0009;
pub const ATTR_REALM: u16 = 0x0014;
pub const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

/// HMAC-SHA1 output length.
const INTEGRITY_LEN: usize = 20;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

pub type TransactionId = [u8; 12];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: u16,
    pub value: Bytes,
}

/// A STUN message with its attributes in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: u16,
    pub transaction_id: TransactionId,
    pub attributes: Vec<Attribute>,
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

impl Message {
    pub fn new(message_type: u16, transaction_id: TransactionId) -> Self {
        Self {
            message_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attr_type: u16, value: impl Into<Bytes>) -> Self {
        self.attributes.push(Attribute {
            attr_type,
            value: value.into(),
        });
        self
    }

    /// Decode a datagram. Returns `None` for anything that is not a
    /// well-formed STUN message.
    pub fn decode(mut buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }

        let message_type = buf.get_u16();
        let length = usize::from(buf.get_u16());
        // The two most significant bits of every STUN message are zero.
        if message_type & 0xC000 != 0 || buf.get_u32() != MAGIC_COOKIE {
            return None;
        }

        let mut transaction_id = [0u8; 12];
        buf.copy_to_slice(&mut transaction_id);

        if buf.remaining() != length || length % 4 != 0 {
            return None;
        }

        let mut attributes = Vec::new();
        while buf.remaining() >= 4 {
            let attr_type = buf.get_u16();
            let attr_len = usize::from(buf.get_u16());
            let padded = padded_len(attr_len);
            if buf.remaining() < padded {
                return None;
            }
            let value = Bytes::copy_from_slice(buf.get(..attr_len)?);
            buf.advance(padded);
            attributes.push(Attribute { attr_type, value });
        }

        Some(Self {
            message_type,
            transaction_id,
            attributes,
        })
    }

    pub fn encode(&self) -> Bytes {
        let body_len: usize = self
            .attributes
            .iter()
            .map(|attr| 4 + padded_len(attr.value.len()))
            .sum();

        let mut out = BytesMut::with_capacity(HEADER_LEN + body_len);
        out.put_u16(self.message_type);
        out.put_u16(body_len as u16);
        out.put_u32(MAGIC_COOKIE);
        out.put_slice(&self.transaction_id);

        for attr in &self.attributes {
            out.put_u16(attr.attr_type);
            out.put_u16(attr.value.len() as u16);
            out.put_slice(&attr.value);
            out.put_bytes(0, padded_len(attr.value.len()) - attr.value.len());
        }

        out.freeze()
    }

    /// Encode and append MESSAGE-INTEGRITY computed with `key`.
    pub fn encode_with_integrity(&self, key: &[u8]) -> Bytes {
        let mut out = BytesMut::from(self.encode().as_ref());
        set_length_through_integrity(&mut out);
        let tag = hmac::sign(&integrity_key(key), &out);

        out.put_u16(ATTR_MESSAGE_INTEGRITY);
        out.put_u16(INTEGRITY_LEN as u16);
        out.put_slice(tag.as_ref());
        out.freeze()
    }

    /// First attribute of the given type.
    pub fn attribute(&self, attr_type: u16) -> Option<&Bytes> {
        self.attributes
            .iter()
            .find(|attr| attr.attr_type == attr_type)
            .map(|attr| &attr.value)
    }

    pub fn username(&self) -> Option<&str> {
        self.attribute(ATTR_USERNAME)
            .and_then(|value| std::str::from_utf8(value).ok())
    }

    pub fn realm(&self) -> Option<&str> {
        self.attribute(ATTR_REALM)
            .and_then(|value| std::str::from_utf8(value).ok())
    }

    /// ERROR-CODE as a numeric code (e.g. 401).
    pub fn error_code(&self) -> Option<u16> {
        let mut value = self.attribute(ATTR_ERROR_CODE)?.as_ref();
        if value.len() < 4 {
            return None;
        }
        value.advance(2);
        let class = u16::from(value.get_u8() & 0x07);
        let number = u16::from(value.get_u8());
        Some(class * 100 + number)
    }

    pub fn xor_mapped_address(&self) -> Option<SocketAddr> {
        decode_xor_address(self.attribute(ATTR_XOR_MAPPED_ADDRESS)?, &self.transaction_id)
    }
}

/// Check the MESSAGE-INTEGRITY attribute of a raw message against `key`.
///
/// False when the attribute is missing, truncated or does not match.
/// Attributes after MESSAGE-INTEGRITY (e.g. FINGERPRINT) are not covered.
pub fn verify_integrity(raw: &[u8], key: &[u8]) -> bool {
    let Some(offset) = integrity_offset(raw) else {
        return false;
    };
    let (Some(covered), Some(tag)) = (
        raw.get(..offset),
        raw.get(offset + 4..offset + 4 + INTEGRITY_LEN),
    ) else {
        return false;
    };

    let mut signed = BytesMut::from(covered);
    set_length_through_integrity(&mut signed);
    hmac::verify(&integrity_key(key), &signed, tag).is_ok()
}

fn integrity_key(key: &[u8]) -> hmac::Key {
    hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key)
}

/// Rewrite the header length so it ends with a MESSAGE-INTEGRITY attribute
/// appended to `covered`.
fn set_length_through_integrity(covered: &mut BytesMut) {
    let length = (covered.len() - HEADER_LEN + 4 + INTEGRITY_LEN) as u16;
    if let Some(field) = covered.get_mut(2..4) {
        field.copy_from_slice(&length.to_be_bytes());
    }
}

/// Byte offset of the MESSAGE-INTEGRITY attribute header, if present.
fn integrity_offset(raw: &[u8]) -> Option<usize> {
    let mut rest = raw.get(HEADER_LEN..)?;
    let mut offset = HEADER_LEN;

    while rest.remaining() >= 4 {
        let attr_type = rest.get_u16();
        let attr_len = usize::from(rest.get_u16());
        if attr_type == ATTR_MESSAGE_INTEGRITY {
            return Some(offset);
        }
        let padded = padded_len(attr_len);
        if rest.remaining() < padded {
            return None;
        }
        rest.advance(padded);
        offset += 4 + padded;
    }

    None
}

/// Binding success response reporting `peer` as the reflexive address.
pub fn binding_success(transaction_id: TransactionId, peer: SocketAddr) -> Message {
    Message::new(BINDING_SUCCESS_RESPONSE, transaction_id).with_attribute(
        ATTR_XOR_MAPPED_ADDRESS,
        encode_xor_address(peer, &transaction_id),
    )
}

/// Binding error response with 401 Unauthorized and the realm to use.
pub fn unauthorized(transaction_id: TransactionId, realm: &str) -> Message {
    Message::new(BINDING_ERROR_RESPONSE, transaction_id)
        .with_attribute(ATTR_ERROR_CODE, encode_error_code(401, "Unauthorized"))
        .with_attribute(ATTR_REALM, Bytes::copy_from_slice(realm.as_bytes()))
}

fn encode_error_code(code: u16, reason: &str) -> Bytes {
    let mut out = BytesMut::with_capacity(4 + reason.len());
    out.put_u16(0);
    out.put_u8((code / 100) as u8);
    out.put_u8((code % 100) as u8);
    out.put_slice(reason.as_bytes());
    out.freeze()
}

/// XOR key for IPv6 addresses: magic cookie followed by the transaction id.
fn ipv6_xor_key(transaction_id: &TransactionId) -> impl Iterator<Item = u8> + '_ {
    MAGIC_COOKIE
        .to_be_bytes()
        .into_iter()
        .chain(transaction_id.iter().copied())
}

fn encode_xor_address(addr: SocketAddr, transaction_id: &TransactionId) -> Bytes {
    let mut out = BytesMut::with_capacity(20);
    out.put_u8(0);
    let x_port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;

    match addr.ip() {
        IpAddr::V4(ip) => {
            out.put_u8(FAMILY_IPV4);
            out.put_u16(x_port);
            out.put_u32(u32::from(ip) ^ MAGIC_COOKIE);
        }
        IpAddr::V6(ip) => {
            out.put_u8(FAMILY_IPV6);
            out.put_u16(x_port);
            for (octet, key) in ip.octets().iter().zip(ipv6_xor_key(transaction_id)) {
                out.put_u8(octet ^ key);
            }
        }
    }

    out.freeze()
}

fn decode_xor_address(mut value: &[u8], transaction_id: &TransactionId) -> Option<SocketAddr> {
    if value.len() < 4 {
        return None;
    }
    value.advance(1);
    let family = value.get_u8();
    let port = value.get_u16() ^ (MAGIC_COOKIE >> 16) as u16;

    let ip = match family {
        FAMILY_IPV4 if value.remaining() >= 4 => {
            IpAddr::V4(Ipv4Addr::from(value.get_u32() ^ MAGIC_COOKIE))
        }
        FAMILY_IPV6 if value.remaining() >= 16 => {
            let mut octets = [0u8; 16];
            for (slot, key) in octets.iter_mut().zip(ipv6_xor_key(transaction_id)) {
                *slot = value.get_u8() ^ key;
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };

    Some(SocketAddr::new(ip, port))
}
