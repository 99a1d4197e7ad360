use std::io;

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tokio_util::codec::Encoder;

use crate::igtl::message::crc64;
use crate::igtl::message::IgtlHeader;
use crate::igtl::message::IgtlMessage;
use crate::igtl::message::HEADER_SIZE;

// an honest tracking server never comes close to this
const MAX_BODY_SIZE: u64 = 1 << 24;

pub struct IgtlCodec;

impl Decoder for IgtlCodec {
    type Error = io::Error;
    type Item = IgtlMessage;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            src.reserve(HEADER_SIZE - src.len());
            return Ok(None);
        }
        let Some(header) = IgtlHeader::parse(&src[..HEADER_SIZE]) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "malformed message header",
            ));
        };
        if header.body_size > MAX_BODY_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message body of {} bytes exceeds limit", header.body_size),
            ));
        }
        let frame_size = HEADER_SIZE + header.body_size as usize;
        if src.len() < frame_size {
            src.reserve(frame_size - src.len());
            return Ok(None);
        }
        let frame = src.split_to(frame_size);
        let body = &frame[HEADER_SIZE..];
        // a zero crc means the sender skipped the checksum
        if header.crc != 0 && crc64(body) != header.crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "message body crc mismatch",
            ));
        }
        Ok(Some(IgtlMessage::from_wire(header, body)))
    }
}

impl Encoder<IgtlMessage> for IgtlCodec {
    type Error = io::Error;

    fn encode(&mut self, item: IgtlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::igtl::message::MessageContent;
    use crate::igtl::message::QuaternionElement;
    use crate::igtl::message::RigidTransform;
    use nalgebra::Point3;
    use nalgebra::UnitQuaternion;

    #[test]
    fn encoded_messages_decode_back() {
        let element = QuaternionElement::from_pose(
            "needle",
            Point3::new(1.0, 2.0, 3.0),
            UnitQuaternion::identity(),
        );
        let sent = IgtlMessage::qtdata(vec![element]);

        let mut buffer = BytesMut::new();
        IgtlCodec.encode(sent.clone(), &mut buffer).unwrap();
        let received = IgtlCodec.decode(&mut buffer).unwrap().unwrap();

        assert_eq!(received, sent);
        assert!(buffer.is_empty());
    }

    #[test]
    fn partial_frames_yield_nothing_until_complete() {
        let sent = IgtlMessage::transform("probe", RigidTransform::identity());
        let mut encoded = BytesMut::new();
        IgtlCodec.encode(sent.clone(), &mut encoded).unwrap();

        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&encoded[..HEADER_SIZE + 10]);
        assert!(IgtlCodec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(&encoded[HEADER_SIZE + 10..]);
        let received = IgtlCodec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(received.device_name, "probe");
        assert!(matches!(received.content, MessageContent::Transform(_)));
    }

    #[test]
    fn a_corrupted_body_fails_the_crc_check() {
        let sent = IgtlMessage::transform("probe", RigidTransform::identity());
        let mut buffer = BytesMut::new();
        IgtlCodec.encode(sent, &mut buffer).unwrap();

        let last = buffer.len() - 1;
        buffer[last] ^= 0xff;
        assert!(IgtlCodec.decode(&mut buffer).is_err());
    }

    #[test]
    fn unknown_message_types_are_passed_through_raw() {
        let sent = IgtlMessage {
            device_name: "imager".to_string(),
            timestamp: 7,
            content: MessageContent::Raw {
                type_name: "IMAGE".to_string(),
                body: vec![1, 2, 3, 4],
            },
        };
        let mut buffer = BytesMut::new();
        IgtlCodec.encode(sent.clone(), &mut buffer).unwrap();
        let received = IgtlCodec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(received, sent);
        assert_eq!(
            received.kind(),
            crate::igtl::message::MessageKind::Unknown
        );
    }

    #[test]
    fn two_back_to_back_frames_decode_separately() {
        let first = IgtlMessage::transform("a", RigidTransform::identity());
        let second = IgtlMessage::transform("b", RigidTransform::identity());
        let mut buffer = BytesMut::new();
        IgtlCodec.encode(first, &mut buffer).unwrap();
        IgtlCodec.encode(second, &mut buffer).unwrap();

        let one = IgtlCodec.decode(&mut buffer).unwrap().unwrap();
        let two = IgtlCodec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(one.device_name, "a");
        assert_eq!(two.device_name, "b");
        assert!(IgtlCodec.decode(&mut buffer).unwrap().is_none());
    }
}
