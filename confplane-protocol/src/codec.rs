//! Encoder and decoder for confplane frames and messages.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::{Request, Response};
use bytes::BytesMut;

/// Encodes requests and responses into frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a request into a frame.
    pub fn encode_request(request: &Request) -> Result<BytesMut, ProtocolError> {
        let frame = Frame::from_json(request)?;
        frame.encode()
    }

    /// Encodes a response into a frame.
    pub fn encode_response(response: &Response) -> Result<BytesMut, ProtocolError> {
        let frame = Frame::from_json(response)?;
        frame.encode()
    }
}

/// Decodes frames into requests and responses.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Attempts to decode the next request from the buffer.
    pub fn decode_request(&mut self) -> Result<Option<Request>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => {
                let payload =
                    std::str::from_utf8(&frame.payload).map_err(|_| ProtocolError::InvalidUtf8)?;
                let request: Request = serde_json::from_str(payload)?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    /// Attempts to decode the next response from the buffer.
    pub fn decode_response(&mut self) -> Result<Option<Response>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => {
                let payload =
                    std::str::from_utf8(&frame.payload).map_err(|_| ProtocolError::InvalidUtf8)?;
                let response: Response = serde_json::from_str(payload)?;
                Ok(Some(response))
            }
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Operation, ResponseStatus};

    #[test]
    fn test_encoder_decoder_roundtrip() {
        let request = Request::new("42", Operation::Ping);
        let encoded = Encoder::encode_request(&request).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&encoded);

        let decoded = decoder.decode_request().unwrap().unwrap();
        assert_eq!(decoded.id, "42");
        assert_eq!(decoded.op, Operation::Ping);
    }

    #[test]
    fn test_partial_frame_decoding() {
        let request = Request::new("1", Operation::Hello);
        let encoded = Encoder::encode_request(&request).unwrap();

        let mut decoder = Decoder::new();

        // Feed partial data
        decoder.extend(&encoded[..10]);
        assert!(decoder.decode_request().unwrap().is_none());

        // Feed the rest
        decoder.extend(&encoded[10..]);
        let decoded = decoder.decode_request().unwrap().unwrap();
        assert_eq!(decoded.id, "1");
    }

    #[test]
    fn test_encode_response() {
        let response = Response::ok("req-1", serde_json::json!({"pong": true}));
        let encoded = Encoder::encode_response(&response).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&encoded);
        let decoded = decoder.decode_response().unwrap().unwrap();

        assert_eq!(decoded.id, "req-1");
        assert_eq!(decoded.status, ResponseStatus::Ok);
    }

    #[test]
    fn test_pipelined_requests() {
        let mut decoder = Decoder::new();
        for id in ["1", "2", "3"] {
            let encoded = Encoder::encode_request(&Request::new(id, Operation::Get)).unwrap();
            decoder.extend(&encoded);
        }

        for expected in ["1", "2", "3"] {
            let decoded = decoder.decode_request().unwrap().unwrap();
            assert_eq!(decoded.id, expected);
        }
        assert!(decoder.decode_request().unwrap().is_none());
    }
}
