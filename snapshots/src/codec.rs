//! Codec registry: per-table binary schemas for snapshot files
//!
//! Every table file starts with a 7-byte header (`LSNP`, format version, codec
//! tag, table tag) followed by the encoded records. Each record frame carries a
//! CRC32 of its payload, so a damaged byte anywhere after the header surfaces
//! as a [`SnapshotError::Pipeline`] instead of a silently different record.
//!
//! | codec     | frame layout                                         |
//! |-----------|------------------------------------------------------|
//! | `default` | `u32` BE length, `u32` BE crc32, MessagePack payload |
//! | `json`    | `{crc32:08x}\t{json}\n`                              |

use std::io::{BufRead, BufReader, Read, Write};
use std::marker::PhantomData;

use crate::constants::codec::{FORMAT_VERSION, MAGIC, MAX_FRAME_LEN};
use crate::errors::SnapshotError;
use crate::ledger::{Record, Table};

pub const DEFAULT_CODEC: &str = "default";
pub const JSON_CODEC: &str = "json";

const HEADER_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    MessagePack,
    Json,
}

impl Format {
    fn tag(&self) -> u8 {
        match self {
            Format::MessagePack => 1,
            Format::Json => 2,
        }
    }
}

/// Encode/decode schema for one table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    format: Format,
    table: Table,
}

pub struct CodecRegistry;

impl CodecRegistry {
    pub fn names() -> &'static [&'static str] {
        &[DEFAULT_CODEC, JSON_CODEC]
    }

    pub fn resolve(codec_name: &str, table: Table) -> Result<Codec, SnapshotError> {
        let format = match codec_name {
            DEFAULT_CODEC => Format::MessagePack,
            JSON_CODEC => Format::Json,
            other => {
                return Err(SnapshotError::configuration(format!(
                    "unknown codec '{}' for table '{}' (available: {})",
                    other,
                    table,
                    Self::names().join(", ")
                )))
            }
        };

        Ok(Codec { format, table })
    }

    /// Same as [`CodecRegistry::resolve`] with the table given by name
    pub fn resolve_named(codec_name: &str, table_name: &str) -> Result<Codec, SnapshotError> {
        let table = table_name.parse::<Table>()?;
        Self::resolve(codec_name, table)
    }
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self.format {
            Format::MessagePack => DEFAULT_CODEC,
            Format::Json => JSON_CODEC,
        }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    fn header(&self) -> [u8; HEADER_LEN] {
        [
            MAGIC[0],
            MAGIC[1],
            MAGIC[2],
            MAGIC[3],
            FORMAT_VERSION,
            self.format.tag(),
            self.table.tag(),
        ]
    }

    pub fn write_header<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), SnapshotError> {
        writer
            .write_all(&self.header())
            .map_err(|e| SnapshotError::pipeline(self.table, format!("write header: {}", e)))
    }

    pub fn encode<R: Record, W: Write + ?Sized>(
        &self,
        record: &R,
        writer: &mut W,
    ) -> Result<(), SnapshotError> {
        if R::TABLE != self.table {
            return Err(SnapshotError::configuration(format!(
                "codec for '{}' cannot encode '{}' records",
                self.table,
                R::TABLE
            )));
        }

        let result = match self.format {
            Format::MessagePack => {
                let payload = rmp_serde::to_vec(record)
                    .map_err(|e| SnapshotError::pipeline(self.table, format!("encode: {}", e)))?;
                let len = u32::try_from(payload.len())
                    .ok()
                    .filter(|len| *len <= MAX_FRAME_LEN)
                    .ok_or_else(|| {
                        SnapshotError::pipeline(
                            self.table,
                            format!("record of {} bytes exceeds frame limit", payload.len()),
                        )
                    })?;

                writer
                    .write_all(&len.to_be_bytes())
                    .and_then(|_| writer.write_all(&crc32fast::hash(&payload).to_be_bytes()))
                    .and_then(|_| writer.write_all(&payload))
            }
            Format::Json => {
                let line = serde_json::to_string(record)
                    .map_err(|e| SnapshotError::pipeline(self.table, format!("encode: {}", e)))?;
                writeln!(writer, "{:08x}\t{}", crc32fast::hash(line.as_bytes()), line)
            }
        };

        result.map_err(|e| SnapshotError::pipeline(self.table, format!("write: {}", e)))
    }

    pub fn decoder<R: Record, Rd: Read>(&self, reader: Rd) -> Decoder<R, Rd> {
        Decoder {
            codec: *self,
            reader: BufReader::new(reader),
            header_checked: false,
            finished: false,
            index: 0,
            _record: PhantomData,
        }
    }
}

/// Lazy, forward-only sequence of records decoded from one table file
pub struct Decoder<R, Rd> {
    codec: Codec,
    reader: BufReader<Rd>,
    header_checked: bool,
    finished: bool,
    index: u64,
    _record: PhantomData<R>,
}

impl<R: Record, Rd: Read> Decoder<R, Rd> {
    fn error(&self, reason: impl Into<String>) -> SnapshotError {
        SnapshotError::pipeline(self.codec.table, reason)
    }

    fn check_header(&mut self) -> Result<(), SnapshotError> {
        let mut header = [0u8; HEADER_LEN];
        self.reader
            .read_exact(&mut header)
            .map_err(|e| self.error(format!("read header: {}", e)))?;

        if header[..4] != MAGIC[..] {
            return Err(self.error("not a snapshot table file"));
        }
        if header[4] != FORMAT_VERSION {
            return Err(self.error(format!("unsupported format version {}", header[4])));
        }
        if header != self.codec.header() {
            return Err(self.error(format!(
                "file was not written by the '{}' codec for table '{}'",
                self.codec.name(),
                self.codec.table
            )));
        }

        Ok(())
    }

    fn at_eof(&mut self) -> Result<bool, SnapshotError> {
        self.reader
            .fill_buf()
            .map(|buf| buf.is_empty())
            .map_err(|e| self.error(format!("read: {}", e)))
    }

    fn read_frame(&mut self) -> Result<Option<R>, SnapshotError> {
        if self.at_eof()? {
            return Ok(None);
        }

        let record_no = self.index + 1;
        match self.codec.format {
            Format::MessagePack => {
                let mut prefix = [0u8; 8];
                self.reader
                    .read_exact(&mut prefix)
                    .map_err(|e| self.error(format!("record {}: truncated frame: {}", record_no, e)))?;

                let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
                let crc = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
                if len > MAX_FRAME_LEN {
                    return Err(self.error(format!(
                        "record {}: frame length {} exceeds limit",
                        record_no, len
                    )));
                }

                let mut payload = vec![0u8; len as usize];
                self.reader
                    .read_exact(&mut payload)
                    .map_err(|e| self.error(format!("record {}: truncated payload: {}", record_no, e)))?;

                if crc32fast::hash(&payload) != crc {
                    return Err(self.error(format!("record {}: checksum mismatch", record_no)));
                }

                rmp_serde::from_slice(&payload)
                    .map(Some)
                    .map_err(|e| self.error(format!("record {}: decode: {}", record_no, e)))
            }
            Format::Json => {
                let mut line = String::new();
                self.reader
                    .read_line(&mut line)
                    .map_err(|e| self.error(format!("record {}: read: {}", record_no, e)))?;

                let body = line
                    .strip_suffix('\n')
                    .ok_or_else(|| self.error(format!("record {}: truncated line", record_no)))?;
                let (crc, json) = body
                    .split_once('\t')
                    .ok_or_else(|| self.error(format!("record {}: missing checksum", record_no)))?;
                let crc = u32::from_str_radix(crc, 16)
                    .map_err(|_| self.error(format!("record {}: malformed checksum", record_no)))?;

                if crc32fast::hash(json.as_bytes()) != crc {
                    return Err(self.error(format!("record {}: checksum mismatch", record_no)));
                }

                serde_json::from_str(json)
                    .map(Some)
                    .map_err(|e| self.error(format!("record {}: decode: {}", record_no, e)))
            }
        }
    }
}

impl<R: Record, Rd: Read> Iterator for Decoder<R, Rd> {
    type Item = Result<R, SnapshotError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if !self.header_checked {
            if let Err(e) = self.check_header() {
                self.finished = true;
                return Some(Err(e));
            }
            self.header_checked = true;
        }

        match self.read_frame() {
            Ok(Some(record)) => {
                self.index += 1;
                Some(Ok(record))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Round;

    fn rounds() -> Vec<Round> {
        (1..=3)
            .map(|i| Round {
                public_key: format!("03key{}", i),
                balance: 1_000 * i,
                round: 7,
            })
            .collect()
    }

    fn encode_all(codec: &Codec, records: &[Round]) -> Vec<u8> {
        let mut buf = Vec::new();
        codec.write_header(&mut buf).unwrap();
        for record in records {
            codec.encode(record, &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn test_unknown_codec_is_configuration_error() {
        let err = CodecRegistry::resolve("lz4", Table::Blocks).unwrap_err();
        assert!(matches!(err, SnapshotError::Configuration { .. }));

        let err = CodecRegistry::resolve_named(DEFAULT_CODEC, "wallets").unwrap_err();
        assert!(matches!(err, SnapshotError::Configuration { .. }));
    }

    #[test]
    fn test_both_codecs_decode_what_they_encode() {
        for name in CodecRegistry::names() {
            let codec = CodecRegistry::resolve(name, Table::Rounds).unwrap();
            let bytes = encode_all(&codec, &rounds());

            let decoded: Vec<Round> = codec
                .decoder(bytes.as_slice())
                .collect::<Result<_, _>>()
                .unwrap();
            assert_eq!(decoded, rounds(), "codec {}", name);
        }
    }

    #[test]
    fn test_encode_rejects_foreign_table() {
        let codec = CodecRegistry::resolve(DEFAULT_CODEC, Table::Blocks).unwrap();
        let err = codec.encode(&rounds()[0], &mut Vec::new()).unwrap_err();
        assert!(matches!(err, SnapshotError::Configuration { .. }));
    }

    #[test]
    fn test_header_mismatch_is_reported() {
        let json = CodecRegistry::resolve(JSON_CODEC, Table::Rounds).unwrap();
        let bytes = encode_all(&json, &rounds());

        let msgpack = CodecRegistry::resolve(DEFAULT_CODEC, Table::Rounds).unwrap();
        let mut decoder = msgpack.decoder::<Round, _>(bytes.as_slice());
        assert!(matches!(
            decoder.next(),
            Some(Err(SnapshotError::Pipeline { .. }))
        ));
        assert!(decoder.next().is_none());
    }

    #[test]
    fn test_every_corrupted_byte_is_detected() {
        for name in CodecRegistry::names() {
            let codec = CodecRegistry::resolve(name, Table::Rounds).unwrap();
            let bytes = encode_all(&codec, &rounds());

            for position in HEADER_LEN..bytes.len() {
                let mut corrupted = bytes.clone();
                corrupted[position] ^= 0x5a;

                let result: Result<Vec<Round>, _> =
                    codec.decoder(corrupted.as_slice()).collect();
                assert!(
                    result.is_err(),
                    "codec {} accepted corruption at byte {}",
                    name,
                    position
                );
            }
        }
    }

    #[test]
    fn test_truncated_frame_fails() {
        let codec = CodecRegistry::resolve(DEFAULT_CODEC, Table::Rounds).unwrap();
        let bytes = encode_all(&codec, &rounds());

        let result: Result<Vec<Round>, _> =
            codec.decoder(&bytes[..bytes.len() - 3]).collect();
        assert!(result.is_err());
    }
}
