//! STUN-style binary framing
//!
//! 20-byte header (type, attribute length, magic cookie, transaction id)
//! followed by type-length-value attributes padded to four bytes. Unknown
//! attribute types are skipped so newer techniques can add attributes without
//! breaking older readers.

use super::{
    Attribute, AttributeType, ErrorCode, Message, MessageClass, MessageMethod, TransactionId,
    Username, XorMappedAddress,
};
use crate::technique::TechniqueCode;
use crate::{Result, TetherError};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed RFC 5389 magic cookie
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// Header length in bytes
pub const HEADER_LEN: usize = 20;

/// Default upper bound on a single message (header included)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

fn encode_type(class: MessageClass, method: MessageMethod) -> u16 {
    let m = method as u16;
    let c = class.bits();
    (m & 0x000F) | ((m & 0x0070) << 1) | ((m & 0x0F80) << 2) | ((c & 0b01) << 4) | ((c & 0b10) << 7)
}

fn decode_type(message_type: u16) -> Result<(MessageClass, MessageMethod)> {
    if message_type & 0xC000 != 0 {
        return Err(TetherError::malformed(format!(
            "leading type bits set: {message_type:#06x}"
        )));
    }
    let c = ((message_type >> 4) & 0b01) | ((message_type >> 7) & 0b10);
    let m = (message_type & 0x000F) | ((message_type & 0x00E0) >> 1) | ((message_type & 0x3E00) >> 2);
    let method = MessageMethod::from_u16(m)
        .ok_or_else(|| TetherError::malformed(format!("unknown method {m:#05x}")))?;
    Ok((MessageClass::from_bits(c), method))
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

impl Message {
    /// Serialize into wire bytes.
    ///
    /// Fails with `MalformedMessage` when an attribute or the whole body does
    /// not fit the 16-bit length fields.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        for attribute in &self.attributes {
            let attribute_type = attribute.attribute_type();
            let value = encode_attribute(attribute, &self.transaction_id);
            let value_len = u16::try_from(value.len()).map_err(|_| {
                TetherError::malformed(format!(
                    "{} value of {} bytes exceeds {} bytes",
                    attribute_type.name(),
                    value.len(),
                    u16::MAX
                ))
            })?;
            body.extend_from_slice(&(attribute_type as u16).to_be_bytes());
            body.extend_from_slice(&value_len.to_be_bytes());
            body.extend_from_slice(&value);
            body.resize(padded(body.len()), 0);
        }
        let body_len = u16::try_from(body.len()).map_err(|_| {
            TetherError::malformed(format!(
                "message body of {} bytes exceeds {} bytes",
                body.len(),
                u16::MAX
            ))
        })?;

        let mut packet = Vec::with_capacity(HEADER_LEN + body.len());
        packet.extend_from_slice(&encode_type(self.class, self.method).to_be_bytes());
        packet.extend_from_slice(&body_len.to_be_bytes());
        packet.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        packet.extend_from_slice(&self.transaction_id.0);
        packet.extend_from_slice(&body);
        Ok(packet)
    }

    /// Parse one complete message from `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(TetherError::malformed("message shorter than header"));
        }
        let (class, method, body_len, transaction_id) = parse_header(&bytes[..HEADER_LEN])?;
        if bytes.len() != HEADER_LEN + body_len {
            return Err(TetherError::malformed(format!(
                "length field says {body_len} bytes, got {}",
                bytes.len() - HEADER_LEN
            )));
        }

        let mut message = Message::with_transaction_id(class, method, transaction_id);
        let body = &bytes[HEADER_LEN..];
        let mut offset = 0;
        while offset < body.len() {
            if offset + 4 > body.len() {
                return Err(TetherError::malformed("truncated attribute header"));
            }
            let attr_type = u16::from_be_bytes([body[offset], body[offset + 1]]);
            let attr_len = u16::from_be_bytes([body[offset + 2], body[offset + 3]]) as usize;
            offset += 4;
            if offset + attr_len > body.len() {
                return Err(TetherError::malformed(format!(
                    "attribute {attr_type:#06x} overruns message"
                )));
            }
            let value = &body[offset..offset + attr_len];
            match AttributeType::from_u16(attr_type) {
                Some(known) => message.add_attribute(decode_attribute(known, value, &transaction_id)?),
                None => tracing::debug!("Skipping unknown attribute type {:#06x}", attr_type),
            }
            offset = padded(offset + attr_len);
        }
        Ok(message)
    }

    /// Write the encoded message to `writer` and flush
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let packet = self.encode()?;
        writer.write_all(&packet).await?;
        writer.flush().await?;
        Ok(())
    }
}

fn parse_header(header: &[u8]) -> Result<(MessageClass, MessageMethod, usize, TransactionId)> {
    let message_type = u16::from_be_bytes([header[0], header[1]]);
    let body_len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let cookie = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if cookie != MAGIC_COOKIE {
        return Err(TetherError::malformed(format!("bad magic cookie {cookie:#010x}")));
    }
    if body_len % 4 != 0 {
        return Err(TetherError::malformed(format!(
            "attribute section length {body_len} is not 4-byte aligned"
        )));
    }
    let (class, method) = decode_type(message_type)?;
    let mut transaction_id = [0u8; 12];
    transaction_id.copy_from_slice(&header[8..HEADER_LEN]);
    Ok((class, method, body_len, TransactionId(transaction_id)))
}

fn encode_attribute(attribute: &Attribute, transaction_id: &TransactionId) -> Vec<u8> {
    match attribute {
        Attribute::Username(username) => username.as_str().as_bytes().to_vec(),
        Attribute::ErrorCode(error) => {
            let mut value = vec![0, 0, (error.code / 100) as u8, (error.code % 100) as u8];
            value.extend_from_slice(error.reason.as_bytes());
            value
        }
        Attribute::XorMappedAddress(address) => encode_xor_address(address.0, transaction_id),
        Attribute::TraversalTechnique(code) => code.value().to_be_bytes().to_vec(),
    }
}

fn decode_attribute(
    attribute_type: AttributeType,
    value: &[u8],
    transaction_id: &TransactionId,
) -> Result<Attribute> {
    let attribute = match attribute_type {
        AttributeType::Username => Attribute::Username(Username(utf8(value, attribute_type)?)),
        AttributeType::ErrorCode => {
            if value.len() < 4 {
                return Err(TetherError::malformed("ERROR-CODE too short"));
            }
            let code = u16::from(value[2] & 0x07) * 100 + u16::from(value[3]);
            Attribute::ErrorCode(ErrorCode {
                code,
                reason: utf8(&value[4..], attribute_type)?,
            })
        }
        AttributeType::XorMappedAddress => {
            Attribute::XorMappedAddress(XorMappedAddress(decode_xor_address(value, transaction_id)?))
        }
        AttributeType::TraversalTechnique => {
            let bytes: [u8; 4] = value
                .try_into()
                .map_err(|_| TetherError::malformed("TRAVERSAL-TECHNIQUE must be 4 bytes"))?;
            Attribute::TraversalTechnique(TechniqueCode::new(u32::from_be_bytes(bytes)))
        }
    };
    Ok(attribute)
}

fn utf8(value: &[u8], attribute_type: AttributeType) -> Result<String> {
    String::from_utf8(value.to_vec())
        .map_err(|_| TetherError::malformed(format!("{attribute_type} is not valid UTF-8")))
}

fn xor_key(transaction_id: &TransactionId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    key[4..].copy_from_slice(&transaction_id.0);
    key
}

fn encode_xor_address(address: SocketAddr, transaction_id: &TransactionId) -> Vec<u8> {
    let key = xor_key(transaction_id);
    let x_port = address.port() ^ (MAGIC_COOKIE >> 16) as u16;
    let mut value = Vec::with_capacity(20);
    value.push(0);
    match address.ip() {
        IpAddr::V4(ip) => {
            value.push(FAMILY_IPV4);
            value.extend_from_slice(&x_port.to_be_bytes());
            value.extend(ip.octets().iter().zip(key.iter()).map(|(b, k)| b ^ k));
        }
        IpAddr::V6(ip) => {
            value.push(FAMILY_IPV6);
            value.extend_from_slice(&x_port.to_be_bytes());
            value.extend(ip.octets().iter().zip(key.iter()).map(|(b, k)| b ^ k));
        }
    }
    value
}

fn decode_xor_address(value: &[u8], transaction_id: &TransactionId) -> Result<SocketAddr> {
    if value.len() < 8 {
        return Err(TetherError::malformed("XOR-MAPPED-ADDRESS too short"));
    }
    let key = xor_key(transaction_id);
    let port = u16::from_be_bytes([value[2], value[3]]) ^ (MAGIC_COOKIE >> 16) as u16;
    match value[1] {
        FAMILY_IPV4 => {
            let mut octets = [0u8; 4];
            for (i, octet) in octets.iter_mut().enumerate() {
                *octet = value[4 + i] ^ key[i];
            }
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        FAMILY_IPV6 => {
            if value.len() < 20 {
                return Err(TetherError::malformed("XOR-MAPPED-ADDRESS IPv6 too short"));
            }
            let mut octets = [0u8; 16];
            for (i, octet) in octets.iter_mut().enumerate() {
                *octet = value[4 + i] ^ key[i];
            }
            Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        family => Err(TetherError::malformed(format!(
            "unsupported address family {family:#04x}"
        ))),
    }
}

/// Reads whole messages off a byte stream
#[derive(Debug, Clone, Copy)]
pub struct MessageReader {
    max_message_size: usize,
}

impl Default for MessageReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl MessageReader {
    /// Reader rejecting messages larger than `max_message_size` bytes
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Read exactly one message.
    ///
    /// Returns `ConnectionClosed` if the stream ends cleanly before the first
    /// header byte, `MalformedMessage` for anything else that is not a
    /// complete, valid message.
    pub async fn read_from<R>(&self, reader: &mut R) -> Result<Message>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; HEADER_LEN];
        let first = reader.read(&mut header[..1]).await?;
        if first == 0 {
            return Err(TetherError::ConnectionClosed);
        }
        reader
            .read_exact(&mut header[1..])
            .await
            .map_err(|e| TetherError::malformed(format!("truncated header: {e}")))?;

        let (_, _, body_len, _) = parse_header(&header)?;
        if HEADER_LEN + body_len > self.max_message_size {
            return Err(TetherError::malformed(format!(
                "message of {} bytes exceeds limit of {}",
                HEADER_LEN + body_len,
                self.max_message_size
            )));
        }

        let mut bytes = vec![0u8; HEADER_LEN + body_len];
        bytes[..HEADER_LEN].copy_from_slice(&header);
        reader
            .read_exact(&mut bytes[HEADER_LEN..])
            .await
            .map_err(|e| TetherError::malformed(format!("truncated body: {e}")))?;
        Message::decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_packing() {
        // Binding-style layout: request 0x0001 -> class bits zero
        assert_eq!(
            encode_type(MessageClass::Request, MessageMethod::Register),
            0x0020
        );
        assert_eq!(
            encode_type(MessageClass::SuccessResponse, MessageMethod::Register),
            0x0120
        );
        assert_eq!(
            encode_type(MessageClass::ErrorResponse, MessageMethod::Register),
            0x0130
        );

        for class in [
            MessageClass::Request,
            MessageClass::Indication,
            MessageClass::SuccessResponse,
            MessageClass::ErrorResponse,
        ] {
            for method in [
                MessageMethod::Register,
                MessageMethod::Deregister,
                MessageMethod::ConnectionRequest,
            ] {
                assert_eq!(decode_type(encode_type(class, method)).unwrap(), (class, method));
            }
        }
    }

    #[test]
    fn test_header_layout() {
        let message = Message::with_transaction_id(
            MessageClass::Request,
            MessageMethod::Deregister,
            TransactionId([0x12; 12]),
        );
        let packet = message.encode().unwrap();

        assert_eq!(packet.len(), HEADER_LEN);
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 0);
        assert_eq!(
            u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            MAGIC_COOKIE
        );
        assert_eq!(&packet[8..20], &[0x12; 12]);
    }

    #[test]
    fn test_xor_mapped_address_ipv4_wire_value() {
        let transaction_id = TransactionId([0x12; 12]);
        let address: SocketAddr = "192.168.1.100:8080".parse().unwrap();
        let value = encode_xor_address(address, &transaction_id);

        let magic = MAGIC_COOKIE.to_be_bytes();
        assert_eq!(value[1], FAMILY_IPV4);
        assert_eq!(
            u16::from_be_bytes([value[2], value[3]]),
            8080 ^ (MAGIC_COOKIE >> 16) as u16
        );
        assert_eq!(value[4], 192 ^ magic[0]);
        assert_eq!(value[7], 100 ^ magic[3]);
        assert_eq!(decode_xor_address(&value, &transaction_id).unwrap(), address);
    }

    #[test]
    fn test_xor_mapped_address_ipv6() {
        let transaction_id = TransactionId([0xA5; 12]);
        let address: SocketAddr = "[2001:db8::42]:51000".parse().unwrap();
        let value = encode_xor_address(address, &transaction_id);
        assert_eq!(value.len(), 20);
        assert_eq!(decode_xor_address(&value, &transaction_id).unwrap(), address);
    }

    #[test]
    fn test_error_code_wire_value() {
        let value = encode_attribute(
            &Attribute::ErrorCode(ErrorCode::new(404, "target not registered")),
            &TransactionId([0; 12]),
        );
        assert_eq!(&value[..4], &[0, 0, 4, 4]);
        let decoded =
            decode_attribute(AttributeType::ErrorCode, &value, &TransactionId([0; 12])).unwrap();
        assert_eq!(
            decoded,
            Attribute::ErrorCode(ErrorCode::new(404, "target not registered"))
        );
    }

    #[test]
    fn test_unknown_attributes_are_skipped() {
        let message = Message::request(MessageMethod::Register).with_attribute(Username::new("abc"));
        let mut bytes = message.encode().unwrap();
        // Append a SOFTWARE attribute (0x8022) the codec does not know about
        bytes.extend_from_slice(&0x8022u16.to_be_bytes());
        bytes.extend_from_slice(&3u16.to_be_bytes());
        bytes.extend_from_slice(b"abc\0");
        let body_len = (bytes.len() - HEADER_LEN) as u16;
        bytes[2..4].copy_from_slice(&body_len.to_be_bytes());

        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        let message = Message::request(MessageMethod::Register).with_attribute(Username::new("abc"));
        let bytes = message.encode().unwrap();

        let mut bad_cookie = bytes.clone();
        bad_cookie[4] ^= 0xFF;
        assert!(matches!(
            Message::decode(&bad_cookie),
            Err(TetherError::MalformedMessage { .. })
        ));

        assert!(matches!(
            Message::decode(&bytes[..bytes.len() - 4]),
            Err(TetherError::MalformedMessage { .. })
        ));

        let mut bad_method = bytes;
        bad_method[1] = 0x2F;
        assert!(matches!(
            Message::decode(&bad_method),
            Err(TetherError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn test_oversized_attribute_is_not_encoded() {
        let message = Message::request(MessageMethod::Register)
            .with_attribute(Username::new("a".repeat(70_000)));
        assert!(matches!(
            message.encode(),
            Err(TetherError::MalformedMessage { ref message }) if message.contains("USERNAME")
        ));
    }

    #[test]
    fn test_oversized_body_is_not_encoded() {
        // Each attribute fits on its own, together they overflow the length field
        let mut message = Message::request(MessageMethod::Register)
            .with_attribute(Username::new("a".repeat(40_000)));
        message.add_attribute(ErrorCode::new(500, "b".repeat(40_000)));
        assert!(matches!(
            message.encode(),
            Err(TetherError::MalformedMessage { ref message }) if message.contains("body")
        ));
    }
}
