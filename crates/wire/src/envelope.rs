use crate::Error;
use bytes::{BufMut, Bytes, BytesMut};
use proto_tablet::Envelope;
use std::io::{Read, Write};

/// Codecs of the compression envelope. Ids are part of the wire contract.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionCodec {
    None = 0,
    Zlib = 2,
    #[default]
    Lz4 = 4,
}

impl CompressionCodec {
    fn from_id(id: i32) -> Result<Self, Error> {
        Ok(match id {
            0 => CompressionCodec::None,
            2 => CompressionCodec::Zlib,
            4 => CompressionCodec::Lz4,
            other => return Err(Error::UnknownCodec(other)),
        })
    }
}

/// Compress `data` and frame it with an `Envelope` header so the receiver
/// can pick the codec and pre-size its output buffer.
pub fn compress_with_envelope(data: &[u8], codec: CompressionCodec) -> Bytes {
    let compressed = match codec {
        CompressionCodec::None => data.to_vec(),
        CompressionCodec::Lz4 => lz4_flex::block::compress(data),
        CompressionCodec::Zlib => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).expect("writing to a Vec");
            encoder.finish().expect("finishing a Vec-backed encoder")
        }
    };

    let header = Envelope {
        codec: codec as i32,
        uncompressed_size: data.len() as u64,
    };
    let header = prost::Message::encode_to_vec(&header);

    let mut out = BytesMut::with_capacity(4 + header.len() + compressed.len());
    out.put_u32_le(header.len() as u32);
    out.put_slice(&header);
    out.put_slice(&compressed);
    out.freeze()
}

/// Undo `compress_with_envelope`.
pub fn decompress_envelope(data: &[u8]) -> Result<Bytes, Error> {
    if data.len() < 4 {
        return Err(Error::UnexpectedEof(data.len()));
    }
    let header_len = u32::from_le_bytes(data[..4].try_into().unwrap()) as usize;
    if data.len() < 4 + header_len {
        return Err(Error::UnexpectedEof(data.len()));
    }
    let header: Envelope = prost::Message::decode(&data[4..4 + header_len])?;
    let payload = &data[4 + header_len..];

    let decompressed = match CompressionCodec::from_id(header.codec)? {
        CompressionCodec::None => payload.to_vec(),
        CompressionCodec::Lz4 => {
            lz4_flex::block::decompress(payload, header.uncompressed_size as usize)
                .map_err(|err| Error::Corrupt(err.to_string()))?
        }
        CompressionCodec::Zlib => {
            let mut out = Vec::with_capacity(header.uncompressed_size as usize);
            flate2::read::ZlibDecoder::new(payload)
                .read_to_end(&mut out)
                .map_err(|err| Error::Corrupt(err.to_string()))?;
            out
        }
    };

    if decompressed.len() as u64 != header.uncompressed_size {
        return Err(Error::SizeMismatch {
            declared: header.uncompressed_size,
            found: decompressed.len() as u64,
        });
    }
    Ok(Bytes::from(decompressed))
}
