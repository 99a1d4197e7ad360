//! OpenIGTLink message model and byte-level encoding.
//!
//! Every message is a 58 byte big-endian header followed by a typed body:
//! version (u16), type name (12 bytes), device name (20 bytes), timestamp
//! (u64, seconds since epoch in the upper 32 bits), body size (u64) and a
//! CRC-64 of the body (ECMA-182 polynomial).

use bytes::Buf;
use bytes::BufMut;
use bytes::BytesMut;
use nalgebra::Matrix3;
use nalgebra::Point3;
use nalgebra::Quaternion;
use nalgebra::Rotation3;
use nalgebra::UnitQuaternion;

pub const HEADER_SIZE: usize = 58;
pub const TDATA_ELEMENT_SIZE: usize = 70;
pub const QTDATA_ELEMENT_SIZE: usize = 50;

const TYPE_NAME_SIZE: usize = 12;
const DEVICE_NAME_SIZE: usize = 20;
const ELEMENT_NAME_SIZE: usize = 20;
const COORDINATE_NAME_SIZE: usize = 32;
const TRANSFORM_BODY_SIZE: usize = 48;

const CRC64_POLY: u64 = 0x42F0_E1EB_A9EA_3693;

const fn build_crc64_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u64) << 56;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000_0000_0000 != 0 {
                (crc << 1) ^ CRC64_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC64_TABLE: [u64; 256] = build_crc64_table();

pub fn crc64(data: &[u8]) -> u64 {
    let mut crc = 0u64;
    for byte in data {
        let index = ((crc >> 56) ^ *byte as u64) & 0xff;
        crc = (crc << 8) ^ CRC64_TABLE[index as usize];
    }
    crc
}

/// 64 bit protocol timestamp: seconds since epoch << 32 | binary fraction.
pub fn igtl_timestamp_now() -> u64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let fraction = ((now.subsec_nanos() as u64) << 32) / 1_000_000_000;
    (now.as_secs() << 32) | (fraction & 0xffff_ffff)
}

pub fn timestamp_to_millis(timestamp: u64) -> f64 {
    let seconds = (timestamp >> 32) as f64;
    let fraction = (timestamp & 0xffff_ffff) as f64 / (1u64 << 32) as f64;
    (seconds + fraction) * 1000.0
}

/// Message classification used by tool discovery and tool updates. The
/// comparison is an exact match of the header type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Tdata,
    Qtdata,
    Transform,
    Unknown,
}

pub fn classify_type_name(type_name: &str) -> MessageKind {
    match type_name {
        "TDATA" => MessageKind::Tdata,
        "QTDATA" => MessageKind::Qtdata,
        "TRANSFORM" => MessageKind::Transform,
        _ => MessageKind::Unknown,
    }
}

/// Rigid transform as transferred on the wire: a column-major 3x3 rotation
/// and a translation, all f32.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub matrix: [f32; 9],
    pub offset: [f32; 3],
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            matrix: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            offset: [0.0, 0.0, 0.0],
        }
    }

    pub fn from_pose(position: Point3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        let rotation = orientation.to_rotation_matrix();
        let m = rotation.matrix();
        let mut matrix = [0.0f32; 9];
        for column in 0..3 {
            for row in 0..3 {
                matrix[column * 3 + row] = m[(row, column)] as f32;
            }
        }
        Self {
            matrix,
            offset: [position.x as f32, position.y as f32, position.z as f32],
        }
    }

    pub fn position(&self) -> Point3<f64> {
        Point3::new(
            self.offset[0] as f64,
            self.offset[1] as f64,
            self.offset[2] as f64,
        )
    }

    pub fn orientation(&self) -> UnitQuaternion<f64> {
        let m = Matrix3::new(
            self.matrix[0] as f64,
            self.matrix[3] as f64,
            self.matrix[6] as f64,
            self.matrix[1] as f64,
            self.matrix[4] as f64,
            self.matrix[7] as f64,
            self.matrix[2] as f64,
            self.matrix[5] as f64,
            self.matrix[8] as f64,
        );
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(m))
    }

    fn encode(&self, dst: &mut BytesMut) {
        for value in self.matrix {
            dst.put_f32(value);
        }
        for value in self.offset {
            dst.put_f32(value);
        }
    }

    fn decode(src: &mut &[u8]) -> Self {
        let mut matrix = [0.0f32; 9];
        for value in matrix.iter_mut() {
            *value = src.get_f32();
        }
        let mut offset = [0.0f32; 3];
        for value in offset.iter_mut() {
            *value = src.get_f32();
        }
        Self { matrix, offset }
    }
}

/// One instrument entry of a TDATA message.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingElement {
    pub name: String,
    pub instrument_type: u8,
    pub transform: RigidTransform,
}

/// One instrument entry of a QTDATA message. The quaternion is transferred
/// as (qx, qy, qz, w).
#[derive(Debug, Clone, PartialEq)]
pub struct QuaternionElement {
    pub name: String,
    pub instrument_type: u8,
    pub position: [f32; 3],
    pub quaternion: [f32; 4],
}

impl QuaternionElement {
    pub fn from_pose(name: &str, position: Point3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self {
            name: name.to_string(),
            instrument_type: 1,
            position: [
                position.x as f32,
                position.y as f32,
                position.z as f32,
            ],
            quaternion: [
                orientation.i as f32,
                orientation.j as f32,
                orientation.k as f32,
                orientation.w as f32,
            ],
        }
    }

    pub fn position(&self) -> Point3<f64> {
        Point3::new(
            self.position[0] as f64,
            self.position[1] as f64,
            self.position[2] as f64,
        )
    }

    pub fn orientation(&self) -> UnitQuaternion<f64> {
        let q = Quaternion::new(
            self.quaternion[3] as f64,
            self.quaternion[0] as f64,
            self.quaternion[1] as f64,
            self.quaternion[2] as f64,
        );
        if q.norm() < 1e-9 {
            UnitQuaternion::identity()
        } else {
            UnitQuaternion::from_quaternion(q)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Transform(RigidTransform),
    Tdata(Vec<TrackingElement>),
    Qtdata(Vec<QuaternionElement>),
    StartTdata {
        resolution_ms: u32,
        coordinate_name: String,
    },
    StartQtdata {
        resolution_ms: u32,
    },
    Raw {
        type_name: String,
        body: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IgtlMessage {
    pub device_name: String,
    pub timestamp: u64,
    pub content: MessageContent,
}

impl IgtlMessage {
    pub fn transform(device_name: &str, transform: RigidTransform) -> Self {
        Self {
            device_name: device_name.to_string(),
            timestamp: igtl_timestamp_now(),
            content: MessageContent::Transform(transform),
        }
    }

    pub fn tdata(elements: Vec<TrackingElement>) -> Self {
        Self {
            device_name: String::new(),
            timestamp: igtl_timestamp_now(),
            content: MessageContent::Tdata(elements),
        }
    }

    pub fn qtdata(elements: Vec<QuaternionElement>) -> Self {
        Self {
            device_name: String::new(),
            timestamp: igtl_timestamp_now(),
            content: MessageContent::Qtdata(elements),
        }
    }

    pub fn start_tdata(resolution_ms: u32, coordinate_name: &str) -> Self {
        Self {
            device_name: String::new(),
            timestamp: igtl_timestamp_now(),
            content: MessageContent::StartTdata {
                resolution_ms,
                coordinate_name: coordinate_name.to_string(),
            },
        }
    }

    pub fn start_qtdata(resolution_ms: u32) -> Self {
        Self {
            device_name: String::new(),
            timestamp: igtl_timestamp_now(),
            content: MessageContent::StartQtdata { resolution_ms },
        }
    }

    pub fn type_name(&self) -> &str {
        match &self.content {
            MessageContent::Transform(_) => "TRANSFORM",
            MessageContent::Tdata(_) => "TDATA",
            MessageContent::Qtdata(_) => "QTDATA",
            MessageContent::StartTdata { .. } => "STT_TDATA",
            MessageContent::StartQtdata { .. } => "STT_QTDATA",
            MessageContent::Raw { type_name, .. } => type_name.as_str(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        classify_type_name(self.type_name())
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let mut body = BytesMut::new();
        match &self.content {
            MessageContent::Transform(transform) => transform.encode(&mut body),
            MessageContent::Tdata(elements) => {
                for element in elements {
                    put_fixed_str(&mut body, &element.name, ELEMENT_NAME_SIZE);
                    body.put_u8(element.instrument_type);
                    body.put_u8(0);
                    element.transform.encode(&mut body);
                }
            }
            MessageContent::Qtdata(elements) => {
                for element in elements {
                    put_fixed_str(&mut body, &element.name, ELEMENT_NAME_SIZE);
                    body.put_u8(element.instrument_type);
                    body.put_u8(0);
                    for value in element.position {
                        body.put_f32(value);
                    }
                    for value in element.quaternion {
                        body.put_f32(value);
                    }
                }
            }
            MessageContent::StartTdata {
                resolution_ms,
                coordinate_name,
            } => {
                body.put_u32(*resolution_ms);
                put_fixed_str(&mut body, coordinate_name, COORDINATE_NAME_SIZE);
            }
            MessageContent::StartQtdata { resolution_ms } => {
                body.put_u32(*resolution_ms);
            }
            MessageContent::Raw { body: raw, .. } => body.put_slice(raw),
        }

        dst.reserve(HEADER_SIZE + body.len());
        dst.put_u16(1);
        put_fixed_str(dst, self.type_name(), TYPE_NAME_SIZE);
        put_fixed_str(dst, &self.device_name, DEVICE_NAME_SIZE);
        dst.put_u64(self.timestamp);
        dst.put_u64(body.len() as u64);
        dst.put_u64(crc64(&body));
        dst.put_slice(&body);
    }

    pub(crate) fn from_wire(header: IgtlHeader, body: &[u8]) -> Self {
        Self {
            device_name: header.device_name,
            timestamp: header.timestamp,
            content: parse_body(&header.type_name, body),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IgtlHeader {
    pub version: u16,
    pub type_name: String,
    pub device_name: String,
    pub timestamp: u64,
    pub body_size: u64,
    pub crc: u64,
}

impl IgtlHeader {
    pub fn parse(src: &[u8]) -> Option<Self> {
        if src.len() < HEADER_SIZE {
            return None;
        }
        let mut buf = src;
        let version = buf.get_u16();
        let type_name = read_fixed_str(&buf[..TYPE_NAME_SIZE]);
        buf.advance(TYPE_NAME_SIZE);
        let device_name = read_fixed_str(&buf[..DEVICE_NAME_SIZE]);
        buf.advance(DEVICE_NAME_SIZE);
        let timestamp = buf.get_u64();
        let body_size = buf.get_u64();
        let crc = buf.get_u64();
        Some(Self {
            version,
            type_name,
            device_name,
            timestamp,
            body_size,
            crc,
        })
    }
}

fn parse_body(type_name: &str, body: &[u8]) -> MessageContent {
    match type_name {
        "TRANSFORM" if body.len() >= TRANSFORM_BODY_SIZE => {
            let mut buf = body;
            MessageContent::Transform(RigidTransform::decode(&mut buf))
        }
        "TDATA" => {
            let mut elements = vec![];
            let mut buf = body;
            while buf.len() >= TDATA_ELEMENT_SIZE {
                let name = read_fixed_str(&buf[..ELEMENT_NAME_SIZE]);
                buf.advance(ELEMENT_NAME_SIZE);
                let instrument_type = buf.get_u8();
                buf.advance(1);
                let transform = RigidTransform::decode(&mut buf);
                elements.push(TrackingElement {
                    name,
                    instrument_type,
                    transform,
                });
            }
            MessageContent::Tdata(elements)
        }
        "QTDATA" => {
            let mut elements = vec![];
            let mut buf = body;
            while buf.len() >= QTDATA_ELEMENT_SIZE {
                let name = read_fixed_str(&buf[..ELEMENT_NAME_SIZE]);
                buf.advance(ELEMENT_NAME_SIZE);
                let instrument_type = buf.get_u8();
                buf.advance(1);
                let mut position = [0.0f32; 3];
                for value in position.iter_mut() {
                    *value = buf.get_f32();
                }
                let mut quaternion = [0.0f32; 4];
                for value in quaternion.iter_mut() {
                    *value = buf.get_f32();
                }
                elements.push(QuaternionElement {
                    name,
                    instrument_type,
                    position,
                    quaternion,
                });
            }
            MessageContent::Qtdata(elements)
        }
        "STT_TDATA" if body.len() >= 4 + COORDINATE_NAME_SIZE => {
            let mut buf = body;
            let resolution_ms = buf.get_u32();
            let coordinate_name = read_fixed_str(&buf[..COORDINATE_NAME_SIZE]);
            MessageContent::StartTdata {
                resolution_ms,
                coordinate_name,
            }
        }
        "STT_QTDATA" if body.len() >= 4 => {
            let mut buf = body;
            MessageContent::StartQtdata {
                resolution_ms: buf.get_u32(),
            }
        }
        _ => MessageContent::Raw {
            type_name: type_name.to_string(),
            body: body.to_vec(),
        },
    }
}

fn put_fixed_str(dst: &mut BytesMut, value: &str, size: usize) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(size);
    dst.put_slice(&bytes[..len]);
    for _ in len..size {
        dst.put_u8(0);
    }
}

fn read_fixed_str(src: &[u8]) -> String {
    let end = src.iter().position(|b| *b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc64_matches_the_ecma_182_check_value() {
        assert_eq!(crc64(b"123456789"), 0x6c40_df5f_0b49_7347);
        assert_eq!(crc64(b""), 0);
    }

    #[test]
    fn classification_requires_an_exact_type_string() {
        assert_eq!(classify_type_name("TDATA"), MessageKind::Tdata);
        assert_eq!(classify_type_name("QTDATA"), MessageKind::Qtdata);
        assert_eq!(classify_type_name("TRANSFORM"), MessageKind::Transform);
        assert_eq!(classify_type_name("TDATA2"), MessageKind::Unknown);
        assert_eq!(classify_type_name("tdata"), MessageKind::Unknown);
        assert_eq!(classify_type_name(""), MessageKind::Unknown);
    }

    #[test]
    fn transform_roundtrips_through_pose_conversion() {
        let position = Point3::new(10.0, -20.0, 30.0);
        let orientation =
            UnitQuaternion::from_euler_angles(0.3, -0.5, 1.2);
        let transform = RigidTransform::from_pose(position, orientation);

        let restored_position = transform.position();
        assert!((restored_position - position).norm() < 1e-5);
        let restored_orientation = transform.orientation();
        assert!(restored_orientation.angle_to(&orientation) < 1e-5);
    }

    #[test]
    fn quaternion_element_roundtrips_a_pose() {
        let position = Point3::new(1.0, 2.0, 3.0);
        let orientation = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let element = QuaternionElement::from_pose("stylus", position, orientation);
        assert!((element.position() - position).norm() < 1e-5);
        assert!(element.orientation().angle_to(&orientation) < 1e-5);
    }

    #[test]
    fn zero_quaternions_decode_to_identity() {
        let element = QuaternionElement {
            name: "broken".to_string(),
            instrument_type: 1,
            position: [0.0; 3],
            quaternion: [0.0; 4],
        };
        assert_eq!(element.orientation(), UnitQuaternion::identity());
    }

    #[test]
    fn start_messages_have_fixed_body_sizes() {
        let mut buf = BytesMut::new();
        IgtlMessage::start_tdata(50, "RAS").encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE + 36);

        let mut buf = BytesMut::new();
        IgtlMessage::start_qtdata(0).encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE + 4);
    }

    #[test]
    fn timestamp_conversion_uses_the_binary_fraction() {
        let timestamp = (5u64 << 32) | (1u64 << 31);
        assert!((timestamp_to_millis(timestamp) - 5500.0).abs() < 1e-6);
    }

    #[test]
    fn long_names_are_truncated_on_the_wire() {
        let transform = IgtlMessage::transform(
            "a-device-name-longer-than-twenty-bytes",
            RigidTransform::identity(),
        );
        let mut buf = BytesMut::new();
        transform.encode(&mut buf);
        let header = IgtlHeader::parse(&buf).unwrap();
        assert_eq!(header.device_name.len(), 20);
        assert_eq!(header.device_name, "a-device-name-longer");
    }
}
