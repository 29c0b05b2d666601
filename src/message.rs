// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! The wire unit exchanged between pipes: an opaque topic prefix plus a
//! payload. Publish patterns use the topic for subscriber-side filtering;
//! every other pattern leaves it empty.

use byteorder::{BigEndian, ByteOrder};

use crate::global::invalid_data_io_error;

const TOPIC_LEN_PREFIX: usize = 4;

/// A message travelling over a pipe.
///
/// `topic` is an opaque byte prefix: for PUB/SUB and SYNC_PUB/SYNC_SUB
/// sockets it carries the publish topic; for every other role it is
/// empty. On the wire it is length-delimited ahead of the payload
/// (`topic_len: u32 BE, topic, body`) so a subscriber can recover the
/// exact bytes the publisher passed as `topic=`, rather than guessing a
/// boundary from filter prefixes alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: Vec<u8>,
    body: Vec<u8>,
}

impl Message {
    pub fn with_body(body: Vec<u8>) -> Message {
        Message { topic: Vec::new(), body }
    }

    pub fn with_topic(topic: Vec<u8>, body: Vec<u8>) -> Message {
        Message { topic, body }
    }

    pub fn topic(&self) -> &[u8] {
        &self.topic
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.topic, self.body)
    }

    /// Encodes as `topic_len ++ topic ++ body`, the wire framing used by
    /// the publish-family protocols.
    pub fn to_framed_buffer(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TOPIC_LEN_PREFIX + self.topic.len() + self.body.len());
        let mut len_bytes = [0u8; TOPIC_LEN_PREFIX];
        BigEndian::write_u32(&mut len_bytes, self.topic.len() as u32);

        buf.extend_from_slice(&len_bytes);
        buf.extend_from_slice(&self.topic);
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Inverse of `to_framed_buffer`.
    pub fn from_framed_buffer(buf: &[u8]) -> std::io::Result<Message> {
        if buf.len() < TOPIC_LEN_PREFIX {
            return Err(invalid_data_io_error("framed message missing topic length"));
        }
        let topic_len = BigEndian::read_u32(&buf[..TOPIC_LEN_PREFIX]) as usize;
        if buf.len() < TOPIC_LEN_PREFIX + topic_len {
            return Err(invalid_data_io_error("framed message topic length out of bounds"));
        }

        let topic = buf[TOPIC_LEN_PREFIX..TOPIC_LEN_PREFIX + topic_len].to_vec();
        let body = buf[TOPIC_LEN_PREFIX + topic_len..].to_vec();

        Ok(Message { topic, body })
    }

    pub fn to_buffer(self) -> Vec<u8> {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framed_buffer_roundtrips_topic_and_body() {
        let msg = Message::with_topic(b"a".to_vec(), b"Hello".to_vec());
        let framed = msg.to_framed_buffer();
        let back = Message::from_framed_buffer(&framed).unwrap();

        assert_eq!(back.topic(), b"a");
        assert_eq!(back.body(), b"Hello");
    }

    #[test]
    fn empty_topic_roundtrips() {
        let msg = Message::with_body(b"payload".to_vec());
        let framed = msg.to_framed_buffer();
        let back = Message::from_framed_buffer(&framed).unwrap();

        assert_eq!(back.topic(), b"");
        assert_eq!(back.body(), b"payload");
    }
}
