use bytes::BytesMut;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/**
# Codec for the control messages

Every control message is preceded by a fixed width header holding its
length as ASCII decimal digits, left aligned and padded with spaces. With
the default width of 10: `"5         READY"`.

File bodies are not going through this codec: they are streamed raw
right after the control message announcing them.
*/
pub struct ControlCodec {
    header_size: usize,
    max_length: usize,
    decode_state: State,
}

/// state of the data being read
///
/// initially we expect the [`State::Head`] which is a pre-determined
/// size and contains the size of the data to read.
enum State {
    Data(usize),
    Head,
}

impl ControlCodec {
    pub fn new(header_size: usize, max_length: usize) -> Self {
        Self {
            header_size,
            max_length,
            decode_state: State::Head,
        }
    }

    fn decode_head(&mut self, src: &mut BytesMut) -> io::Result<Option<usize>> {
        if src.len() < self.header_size {
            return Ok(None);
        }

        let head = src.split_to(self.header_size);
        let n = std::str::from_utf8(&head)
            .ok()
            .and_then(|head| head.trim().parse::<usize>().ok())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "invalid control message header")
            })?;

        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "empty control message",
            ));
        }

        if n > self.max_length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "control message is too long",
            ));
        }

        src.reserve(n);

        Ok(Some(n))
    }
}

impl Decoder for ControlCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let n = match self.decode_state {
            State::Head => match self.decode_head(src)? {
                Some(n) => {
                    self.decode_state = State::Data(n);
                    n
                }
                None => return Ok(None),
            },
            State::Data(n) => n,
        };

        if src.len() < n {
            return Ok(None);
        }

        let data = src.split_to(n);
        self.decode_state = State::Head;

        String::from_utf8(data.to_vec())
            .map(Some)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
    }
}

impl Encoder<String> for ControlCodec {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let n = item.len();

        if n == 0 || n > self.max_length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "control message length out of bounds",
            ));
        }

        let head = format!("{:<width$}", n, width = self.header_size);
        if head.len() != self.header_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "control message length does not fit in the header",
            ));
        }

        dst.reserve(self.header_size + n);
        dst.extend_from_slice(head.as_bytes());
        dst.extend_from_slice(item.as_bytes());

        Ok(())
    }
}
