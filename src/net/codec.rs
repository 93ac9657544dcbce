use std::io;

use bytes::{Buf, BufMut, BytesMut};
use log::{trace, warn};
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

use crate::{
    entity::EntityKind,
    model::{Vec2f, Vec3d},
    net::{
        proto::{BlockChange, Packet},
        zlib,
    },
    world::{
        pos::{BlockPos, ChunkPos},
        section::SECTION_VOLUME,
    },
};

pub const MAX_PACKET_LEN: usize = 2 * 1024 * 1024;
const MAX_BLOCK_CHANGES: usize = 4096;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

pub fn calc_varint_size(mut value: i32) -> usize {
    let mut size: usize = 0;
    loop {
        value = ((value as u32) >> 7) as i32;
        size += 1;
        if value == 0 {
            break;
        }
    }
    size
}

pub trait ProtocolBufExt {
    fn has_complete_var_int(&self) -> bool;
    fn need(&self, len: usize) -> io::Result<()>;
    fn read_var_int(&mut self) -> io::Result<i32>;
    fn read_string(&mut self) -> io::Result<String>;
    fn read_f32(&mut self) -> io::Result<f32>;
    fn read_f64(&mut self) -> io::Result<f64>;
    fn read_vec3d(&mut self) -> io::Result<Vec3d>;
    fn read_vec2f(&mut self) -> io::Result<Vec2f>;
    fn read_chunk_pos(&mut self) -> io::Result<ChunkPos>;
    fn read_block_pos(&mut self) -> io::Result<BlockPos>;
}

impl ProtocolBufExt for BytesMut {
    fn has_complete_var_int(&self) -> bool {
        self.iter().take(5).any(|byte| byte & 0x80 == 0)
    }

    fn need(&self, len: usize) -> io::Result<()> {
        if self.remaining() < len {
            return Err(invalid(format!(
                "Needed {} bytes, {} left",
                len,
                self.remaining()
            )));
        }
        Ok(())
    }

    fn read_var_int(&mut self) -> io::Result<i32> {
        let mut result = 0i32;
        for i in 0..5 {
            self.need(1)?;
            let byte = self.get_u8();
            let value = (byte & 0x7f) as i32;
            result |= value << (i * 7);

            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(invalid("VarInt too long"))
    }

    fn read_string(&mut self) -> io::Result<String> {
        let str_len = self.read_var_int()?;
        if str_len < 0 {
            return Err(invalid("Negative string length"));
        }
        self.need(str_len as usize)?;
        let str_data = self.split_to(str_len as usize);
        String::from_utf8(str_data.to_vec()).map_err(|e| invalid(e.to_string()))
    }

    fn read_f32(&mut self) -> io::Result<f32> {
        self.need(4)?;
        let val = self.get_f32();
        if !val.is_finite() {
            return Err(invalid("Non-finite float"));
        }
        Ok(val)
    }

    fn read_f64(&mut self) -> io::Result<f64> {
        self.need(8)?;
        let val = self.get_f64();
        if !val.is_finite() {
            return Err(invalid("Non-finite double"));
        }
        Ok(val)
    }

    fn read_vec3d(&mut self) -> io::Result<Vec3d> {
        Ok(Vec3d::new(self.read_f64()?, self.read_f64()?, self.read_f64()?))
    }

    fn read_vec2f(&mut self) -> io::Result<Vec2f> {
        Ok(Vec2f::new(self.read_f32()?, self.read_f32()?))
    }

    fn read_chunk_pos(&mut self) -> io::Result<ChunkPos> {
        self.need(12)?;
        Ok(ChunkPos::new(self.get_i32(), self.get_i32(), self.get_i32()))
    }

    fn read_block_pos(&mut self) -> io::Result<BlockPos> {
        self.need(8)?;
        Ok(BlockPos::from_u64(self.get_u64()))
    }
}

pub trait ProtocolBufMutExt {
    fn put_var_int(&mut self, value: i32);
    fn put_string(&mut self, value: &str);
    fn put_vec3d(&mut self, value: Vec3d);
    fn put_vec2f(&mut self, value: Vec2f);
    fn put_chunk_pos(&mut self, pos: ChunkPos);
}

impl ProtocolBufMutExt for BytesMut {
    fn put_var_int(&mut self, value: i32) {
        let mut value = value as u32;
        loop {
            let mut cur_byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                cur_byte |= 0x80;
            }
            self.put_u8(cur_byte);
            if value == 0 {
                break;
            }
        }
    }

    fn put_string(&mut self, value: &str) {
        self.put_var_int(value.len() as i32);
        self.put_slice(value.as_bytes());
    }

    fn put_vec3d(&mut self, value: Vec3d) {
        self.put_f64(value.x);
        self.put_f64(value.y);
        self.put_f64(value.z);
    }

    fn put_vec2f(&mut self, value: Vec2f) {
        self.put_f32(value.x);
        self.put_f32(value.y);
    }

    fn put_chunk_pos(&mut self, pos: ChunkPos) {
        self.put_i32(pos.x);
        self.put_i32(pos.y);
        self.put_i32(pos.z);
    }
}

/// Which end of the connection a codec lives on. A codec only decodes the
/// packets its peer is allowed to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

enum DecoderState {
    Header,
    Body(usize),
}

pub struct ProtocolCodec {
    side: Side,
    decoder_state: DecoderState,
}

impl ProtocolCodec {
    pub fn new(side: Side) -> ProtocolCodec {
        ProtocolCodec {
            side,
            decoder_state: DecoderState::Header,
        }
    }

    fn decode_payload(&self, buf: &mut BytesMut) -> io::Result<Option<Packet>> {
        let packet_id = buf.read_var_int()?;
        let serverbound = packet_id < 0x10;
        if serverbound != (self.side == Side::Server) {
            return Err(invalid(format!(
                "Packet {:#x} sent in wrong direction",
                packet_id
            )));
        }

        let packet = match packet_id {
            0x00 => Packet::C00Handshake {
                protocol_version: buf.read_var_int()?,
                username: buf.read_string()?,
            },
            0x01 => {
                buf.need(4)?;
                Packet::C01KeepAlive { id: buf.get_i32() }
            }
            0x02 => Packet::C02RequestChunk {
                pos: buf.read_chunk_pos()?,
            },
            0x03 => Packet::C03PlayerIntent {
                position: buf.read_vec3d()?,
                rotation: buf.read_vec2f()?,
                velocity: buf.read_vec3d()?,
            },
            0x04 => {
                let location = buf.read_block_pos()?;
                buf.need(2)?;
                Packet::C04BlockEdit {
                    location,
                    block_state: buf.get_u16(),
                }
            }

            0x10 => {
                buf.need(4 + 16)?;
                let entity_id = buf.get_u32();
                let uuid = Uuid::from_u128(buf.get_u128());
                Packet::S10JoinGame {
                    entity_id,
                    uuid,
                    spawn: buf.read_vec3d()?,
                }
            }
            0x11 => {
                buf.need(4)?;
                Packet::S11KeepAlive { id: buf.get_i32() }
            }
            0x12 => {
                let pos = buf.read_chunk_pos()?;
                let packed_len = buf.read_var_int()?;
                if packed_len < 0 {
                    return Err(invalid("Negative chunk payload length"));
                }
                buf.need(packed_len as usize)?;
                let packed = buf.split_to(packed_len as usize);
                let raw = zlib::decompress_exact(&packed, SECTION_VOLUME * 2)?;

                let mut blocks = Box::new([0u16; SECTION_VOLUME]);
                for (block, bytes) in blocks.iter_mut().zip(raw.chunks_exact(2)) {
                    *block = u16::from_be_bytes([bytes[0], bytes[1]]);
                }
                Packet::S12ChunkData { pos, blocks }
            }
            0x13 => {
                let count = buf.read_var_int()?;
                if count < 0 || count as usize > MAX_BLOCK_CHANGES {
                    return Err(invalid(format!("Bad block change count {}", count)));
                }
                let mut changes = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let location = buf.read_block_pos()?;
                    buf.need(2)?;
                    changes.push(BlockChange {
                        location,
                        block_state: buf.get_u16(),
                    });
                }
                Packet::S13BlockChanges { changes }
            }
            0x14 => {
                buf.need(5)?;
                let entity_id = buf.get_u32();
                let kind = EntityKind::from_wire(buf.get_u8())
                    .ok_or_else(|| invalid("Unknown entity kind"))?;
                Packet::S14EntityUpdate {
                    entity_id,
                    kind,
                    position: buf.read_vec3d()?,
                    rotation: buf.read_vec2f()?,
                    velocity: buf.read_vec3d()?,
                }
            }
            0x15 => {
                buf.need(4)?;
                Packet::S15EntityRemove {
                    entity_id: buf.get_u32(),
                }
            }
            0x16 => Packet::S16Disconnect {
                reason: buf.read_string()?,
            },
            _ => return Ok(None),
        };

        if buf.has_remaining() {
            return Err(invalid(format!(
                "{} trailing bytes after packet {:#x}",
                buf.remaining(),
                packet_id
            )));
        }
        Ok(Some(packet))
    }

    fn encode_payload(packet: &Packet, buf: &mut BytesMut) -> io::Result<()> {
        buf.put_var_int(packet.id());
        match packet {
            Packet::C00Handshake {
                protocol_version,
                username,
            } => {
                buf.put_var_int(*protocol_version);
                buf.put_string(username);
            }
            Packet::C01KeepAlive { id } | Packet::S11KeepAlive { id } => buf.put_i32(*id),
            Packet::C02RequestChunk { pos } => buf.put_chunk_pos(*pos),
            Packet::C03PlayerIntent {
                position,
                rotation,
                velocity,
            } => {
                buf.put_vec3d(*position);
                buf.put_vec2f(*rotation);
                buf.put_vec3d(*velocity);
            }
            Packet::C04BlockEdit {
                location,
                block_state,
            } => {
                buf.put_u64(location.to_u64());
                buf.put_u16(*block_state);
            }
            Packet::S10JoinGame {
                entity_id,
                uuid,
                spawn,
            } => {
                buf.put_u32(*entity_id);
                buf.put_u128(uuid.as_u128());
                buf.put_vec3d(*spawn);
            }
            Packet::S12ChunkData { pos, blocks } => {
                let mut raw = Vec::with_capacity(SECTION_VOLUME * 2);
                for block in blocks.iter() {
                    raw.extend_from_slice(&block.to_be_bytes());
                }
                let packed = zlib::compress(&raw)?;

                buf.put_chunk_pos(*pos);
                buf.put_var_int(packed.len() as i32);
                buf.put_slice(&packed);
            }
            Packet::S13BlockChanges { changes } => {
                if changes.len() > MAX_BLOCK_CHANGES {
                    return Err(invalid("Too many block changes in one packet"));
                }
                buf.put_var_int(changes.len() as i32);
                for change in changes {
                    buf.put_u64(change.location.to_u64());
                    buf.put_u16(change.block_state);
                }
            }
            Packet::S14EntityUpdate {
                entity_id,
                kind,
                position,
                rotation,
                velocity,
            } => {
                buf.put_u32(*entity_id);
                buf.put_u8(kind.to_wire());
                buf.put_vec3d(*position);
                buf.put_vec2f(*rotation);
                buf.put_vec3d(*velocity);
            }
            Packet::S15EntityRemove { entity_id } => buf.put_u32(*entity_id),
            Packet::S16Disconnect { reason } => buf.put_string(reason),
        }
        Ok(())
    }
}

impl Decoder for ProtocolCodec {
    type Item = Packet;

    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.decoder_state {
                DecoderState::Header => {
                    if !src.has_complete_var_int() {
                        if src.len() >= 5 {
                            return Err(invalid("Packet length prefix is longer than 5 bytes"));
                        }
                        return Ok(None);
                    }

                    let packet_len = src.read_var_int()?;
                    if packet_len <= 0 || packet_len as usize > MAX_PACKET_LEN {
                        return Err(invalid(format!(
                            "Packet of length {} not allowed.",
                            packet_len
                        )));
                    }
                    self.decoder_state = DecoderState::Body(packet_len as usize);
                }
                DecoderState::Body(packet_len) => {
                    if src.remaining() < packet_len {
                        src.reserve(packet_len - src.remaining());
                        return Ok(None);
                    }
                    self.decoder_state = DecoderState::Header;

                    let mut payload = src.split_to(packet_len);
                    match self.decode_payload(&mut payload) {
                        Ok(Some(packet)) => {
                            trace!("Decoded packet {:#x} with length {}", packet.id(), packet_len);
                            return Ok(Some(packet));
                        }
                        Ok(None) => trace!("Skipping unknown packet of length {}", packet_len),
                        Err(e) => warn!("Dropping malformed packet: {}", e),
                    }
                }
            }
        }
    }
}

impl Encoder<Packet> for ProtocolCodec {
    type Error = io::Error;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if packet.is_serverbound() != (self.side == Side::Client) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Packet {:#x} cannot be sent from this side", packet.id()),
            ));
        }

        let mut payload = BytesMut::new();
        Self::encode_payload(&packet, &mut payload)?;
        if payload.len() > MAX_PACKET_LEN {
            return Err(invalid(format!("Packet of length {} too large.", payload.len())));
        }

        dst.reserve(calc_varint_size(payload.len() as i32) + payload.len());
        dst.put_var_int(payload.len() as i32);
        dst.put_slice(&payload);
        Ok(())
    }
}
