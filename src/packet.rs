use crate::error::RconError;

/// Wire-level packet types. `Exec` and `AuthResponse` share the numeric
/// code 2 and are told apart purely by direction: clients send `Exec`,
/// servers answer an `Auth` with `AuthResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    // SERVERDATA_AUTH
    Auth,
    // SERVERDATA_EXECCOMMAND
    Exec,
    // SERVERDATA_AUTH_RESPONSE
    AuthResponse,
    // SERVERDATA_RESPONSE_VALUE
    Response,
}

impl PacketType {
    pub fn as_i32(&self) -> i32 {
        match self {
            PacketType::Auth => 3,
            PacketType::Exec => 2,
            PacketType::AuthResponse => 2,
            PacketType::Response => 0,
        }
    }

    pub fn to_le_bytes(&self) -> [u8; 4] {
        self.as_i32().to_le_bytes()
    }
}

impl TryFrom<i32> for PacketType {
    type Error = RconError;

    // Decoding is only ever done on server-sent packets, so 2 always
    // means an auth response here.
    fn try_from(value: i32) -> Result<PacketType, Self::Error> {
        match value {
            3 => Ok(PacketType::Auth),
            2 => Ok(PacketType::AuthResponse),
            0 => Ok(PacketType::Response),
            other => Err(RconError::UnknownPacketType(other)),
        }
    }
}

/// A single RCON protocol message. Immutable once built; packets own no
/// resources and know nothing about the socket they travel over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    id: i32,
    packet_type: PacketType,
    body: String,
}

impl Packet {
    // Since the only one of these values that can change in length is the body,
    // an easy way to calculate the size of a packet is to find the byte-length
    // of the packet body, then add 10 to it (id, type, two NUL terminators).
    pub const BASE_PACKET_SIZE: usize = 10;

    pub fn new(id: i32, packet_type: PacketType, body: impl Into<String>) -> Self {
        Packet {
            id,
            packet_type,
            body: body.into(),
        }
    }

    /// The value of the length prefix: everything after the prefix itself.
    pub fn size(&self) -> i32 {
        (self.body.len() + Self::BASE_PACKET_SIZE) as i32
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn body(&self) -> &str {
        self.body.as_ref()
    }

    /// The body as callers should see it: trailing whitespace trimmed,
    /// and `None` when nothing remains. Factorio answers commands that
    /// produce no output with a bare newline.
    pub fn output(&self) -> Option<&str> {
        let trimmed = self.body.trim_end();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }

    /// Serialize the packet for the wire: size, id, type, body, terminator.
    pub fn pack(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(4 + self.body.len() + Self::BASE_PACKET_SIZE);
        payload.extend_from_slice(&self.size().to_le_bytes());
        payload.extend_from_slice(&self.id.to_le_bytes());
        payload.extend_from_slice(&self.packet_type.to_le_bytes());
        payload.extend_from_slice(self.body.as_bytes());
        // null terminate the body (C string interop), then null terminate the
        // always-empty trailing string the protocol mandates
        payload.extend_from_slice(&[0, 0]);
        payload
    }

    /// Parse a packet from the bytes following the length prefix. The
    /// caller must pass exactly as many bytes as the prefix declared.
    pub fn unpack(payload: &[u8]) -> Result<Self, RconError> {
        if payload.len() < Self::BASE_PACKET_SIZE {
            return Err(RconError::MalformedPacket(
                "payload shorter than the fixed packet fields",
            ));
        }
        let id = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let type_code = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let (body_bytes, terminators) = payload[8..].split_at(payload.len() - Self::BASE_PACKET_SIZE);
        if terminators != [0, 0] {
            return Err(RconError::MalformedPacket("missing NUL terminators"));
        }
        let body = std::str::from_utf8(body_bytes)?;

        Ok(Packet {
            id,
            packet_type: type_code.try_into()?,
            body: body.to_owned(),
        })
    }
}
