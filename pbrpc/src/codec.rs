//! Wire encoding for RPC payloads, a thin layer over [prost](https://docs.rs/prost/0.7).

/// Anything that can travel through the simulated network.
pub trait Message: prost::Message + Default {}
impl<T: prost::Message + Default> Message for T {}

pub type EncodeError = prost::EncodeError;
pub type DecodeError = prost::DecodeError;

/// Appends the encoded form of `message` to `buf`.
pub fn encode<M: Message>(message: &M, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
    buf.reserve(message.encoded_len());
    message.encode(buf)
}

/// Decodes a message from `buf`. An empty buffer yields the default message.
pub fn decode<M: Message>(buf: &[u8]) -> Result<M, DecodeError> {
    M::decode(buf)
}
