// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    config::{CompressionPolicy, CompressionType, Config, StopStyle, UniversalOptions},
    UserKey,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use byteview::ByteView;

/// A persisted configuration entry
pub type KvPair = (UserKey, ByteView);

/// Error during decoding of persisted configuration
#[derive(Debug)]
pub enum DecodeError {
    /// Invalid enum tag
    InvalidTag((&'static str, u8)),

    /// Bytes were left over after decoding a value
    TrailingBytes(&'static str),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DecodeError({self:?})")
    }
}

impl std::error::Error for DecodeError {}

/// Encodes a config value
pub trait EncodeConfig {
    /// Serializes the value.
    fn encode(&self) -> ByteView;
}

/// Decodes a config value
pub trait DecodeConfig {
    /// Deserializes the value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are malformed.
    fn decode(bytes: &[u8]) -> crate::Result<Self>
    where
        Self: Sized;
}

// NOTE: Writing into a Vec cannot fail
#[allow(clippy::expect_used)]
fn vec_write(result: std::io::Result<()>) {
    result.expect("cannot fail writing into a vec");
}

fn ensure_consumed(bytes: &[u8], what: &'static str) -> crate::Result<()> {
    if bytes.is_empty() {
        Ok(())
    } else {
        Err(DecodeError::TrailingBytes(what).into())
    }
}

fn encode_u64(n: u64) -> ByteView {
    let mut v: Vec<u8> = Vec::with_capacity(8);
    vec_write(v.write_u64::<LittleEndian>(n));
    ByteView::from(v)
}

fn decode_u64(mut bytes: &[u8], what: &'static str) -> crate::Result<u64> {
    let n = bytes.read_u64::<LittleEndian>()?;
    ensure_consumed(bytes, what)?;
    Ok(n)
}

fn decode_bool(mut bytes: &[u8], what: &'static str) -> crate::Result<bool> {
    let b = bytes.read_u8()?;
    ensure_consumed(bytes, what)?;
    Ok(b != 0)
}

impl CompressionType {
    fn encode_into<W: std::io::Write>(self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Self::None => {
                writer.write_u8(0)?;
                writer.write_u8(0)?;
            }
            Self::Lz4 => {
                writer.write_u8(1)?;
                writer.write_u8(0)?;
            }
            Self::Miniz(level) => {
                writer.write_u8(2)?;
                writer.write_u8(level)?;
            }
        }
        Ok(())
    }

    fn decode_from<R: std::io::Read>(reader: &mut R) -> crate::Result<Self> {
        let tag = reader.read_u8()?;
        let level = reader.read_u8()?;

        match tag {
            0 => Ok(Self::None),
            1 => Ok(Self::Lz4),
            2 => Ok(Self::Miniz(level)),
            tag => Err(DecodeError::InvalidTag(("CompressionType", tag)).into()),
        }
    }
}

impl EncodeConfig for CompressionType {
    fn encode(&self) -> ByteView {
        let mut v: Vec<u8> = Vec::with_capacity(2);
        vec_write(self.encode_into(&mut v));
        ByteView::from(v)
    }
}

impl DecodeConfig for CompressionType {
    fn decode(mut bytes: &[u8]) -> crate::Result<Self> {
        let c = Self::decode_from(&mut bytes)?;
        ensure_consumed(bytes, "CompressionType")?;
        Ok(c)
    }
}

impl EncodeConfig for Option<CompressionType> {
    fn encode(&self) -> ByteView {
        let mut v: Vec<u8> = vec![];

        match self {
            Some(c) => {
                vec_write(v.write_u8(1));
                vec_write(c.encode_into(&mut v));
            }
            None => {
                vec_write(v.write_u8(0));
            }
        }

        ByteView::from(v)
    }
}

impl DecodeConfig for Option<CompressionType> {
    fn decode(mut bytes: &[u8]) -> crate::Result<Self> {
        let c = match bytes.read_u8()? {
            0 => None,
            1 => Some(CompressionType::decode_from(&mut bytes)?),
            tag => return Err(DecodeError::InvalidTag(("Option<CompressionType>", tag)).into()),
        };
        ensure_consumed(bytes, "Option<CompressionType>")?;
        Ok(c)
    }
}

impl EncodeConfig for CompressionPolicy {
    fn encode(&self) -> ByteView {
        let mut v: Vec<u8> = vec![];

        // NOTE: Policies are limited to 255 entries
        #[allow(clippy::cast_possible_truncation)]
        let len = self.len() as u8;
        vec_write(v.write_u8(len));

        for item in self.iter() {
            vec_write(item.encode_into(&mut v));
        }

        ByteView::from(v)
    }
}

impl DecodeConfig for CompressionPolicy {
    fn decode(mut bytes: &[u8]) -> crate::Result<Self> {
        let len = bytes.read_u8()?;

        if len == 0 {
            return Err(DecodeError::InvalidTag(("CompressionPolicy", len)).into());
        }

        let mut v: Vec<CompressionType> = Vec::with_capacity(usize::from(len));

        for _ in 0..len {
            v.push(CompressionType::decode_from(&mut bytes)?);
        }

        ensure_consumed(bytes, "CompressionPolicy")?;

        Ok(Self::new(v))
    }
}

impl From<StopStyle> for u8 {
    fn from(value: StopStyle) -> Self {
        match value {
            StopStyle::SimilarSize => 0,
            StopStyle::TotalSize => 1,
        }
    }
}

impl TryFrom<u8> for StopStyle {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::SimilarSize),
            1 => Ok(Self::TotalSize),
            tag => Err(DecodeError::InvalidTag(("StopStyle", tag))),
        }
    }
}

impl EncodeConfig for UniversalOptions {
    fn encode(&self) -> ByteView {
        let mut v: Vec<u8> = Vec::with_capacity(20);

        vec_write(v.write_u32::<LittleEndian>(self.size_ratio));
        vec_write(v.write_u32::<LittleEndian>(self.min_merge_width));
        vec_write(v.write_u32::<LittleEndian>(self.max_merge_width));
        vec_write(v.write_u32::<LittleEndian>(self.max_size_amplification_percent));
        vec_write(v.write_i32::<LittleEndian>(self.compression_size_percent));
        vec_write(v.write_u8(self.stop_style.into()));

        let flags = u8::from(self.allow_trivial_move) | (u8::from(self.incremental) << 1);
        vec_write(v.write_u8(flags));

        ByteView::from(v)
    }
}

impl DecodeConfig for UniversalOptions {
    fn decode(mut bytes: &[u8]) -> crate::Result<Self> {
        let size_ratio = bytes.read_u32::<LittleEndian>()?;
        let min_merge_width = bytes.read_u32::<LittleEndian>()?;
        let max_merge_width = bytes.read_u32::<LittleEndian>()?;
        let max_size_amplification_percent = bytes.read_u32::<LittleEndian>()?;
        let compression_size_percent = bytes.read_i32::<LittleEndian>()?;
        let stop_style = StopStyle::try_from(bytes.read_u8()?)?;
        let flags = bytes.read_u8()?;

        ensure_consumed(bytes, "UniversalOptions")?;

        Ok(Self {
            size_ratio,
            min_merge_width,
            max_merge_width,
            max_size_amplification_percent,
            compression_size_percent,
            stop_style,
            allow_trivial_move: flags & 0b01 != 0,
            incremental: flags & 0b10 != 0,
        })
    }
}

const KEY_LEVEL_COUNT: &str = "level_count";
const KEY_L0_TRIGGER: &str = "level0_file_num_compaction_trigger";
const KEY_MAX_COMPACTION_BYTES: &str = "max_compaction_bytes";
const KEY_TARGET_FILE_SIZE_BASE: &str = "target_file_size_base";
const KEY_TARGET_FILE_SIZE_MULTIPLIER: &str = "target_file_size_multiplier";
const KEY_ALLOW_INGEST_BEHIND: &str = "allow_ingest_behind";
const KEY_PERIODIC_COMPACTION_SECONDS: &str = "periodic_compaction_seconds";
const KEY_TOMBSTONE_RATIO_TRIGGER: &str = "tombstone_ratio_trigger";
const KEY_COMPRESSION: &str = "compression";
const KEY_BOTTOMMOST_COMPRESSION: &str = "bottommost_compression";
const KEY_UNIVERSAL: &str = "universal";

impl Config {
    /// Serializes the configuration into key-value pairs.
    ///
    /// Storage paths are deployment specific and not persisted.
    #[must_use]
    pub fn encode_kvs(&self) -> Vec<KvPair> {
        let mut ratio: Vec<u8> = Vec::with_capacity(5);
        match self.tombstone_ratio_trigger {
            Some(r) => {
                vec_write(ratio.write_u8(1));
                vec_write(ratio.write_f32::<LittleEndian>(r));
            }
            None => {
                vec_write(ratio.write_u8(0));
            }
        }

        vec![
            (
                KEY_LEVEL_COUNT.as_bytes().into(),
                ByteView::from(vec![self.level_count]),
            ),
            (
                KEY_L0_TRIGGER.as_bytes().into(),
                encode_u64(self.level0_file_num_compaction_trigger.into()),
            ),
            (
                KEY_MAX_COMPACTION_BYTES.as_bytes().into(),
                encode_u64(self.max_compaction_bytes),
            ),
            (
                KEY_TARGET_FILE_SIZE_BASE.as_bytes().into(),
                encode_u64(self.target_file_size_base),
            ),
            (
                KEY_TARGET_FILE_SIZE_MULTIPLIER.as_bytes().into(),
                encode_u64(self.target_file_size_multiplier.into()),
            ),
            (
                KEY_ALLOW_INGEST_BEHIND.as_bytes().into(),
                ByteView::from(vec![u8::from(self.allow_ingest_behind)]),
            ),
            (
                KEY_PERIODIC_COMPACTION_SECONDS.as_bytes().into(),
                encode_u64(self.periodic_compaction_seconds),
            ),
            (
                KEY_TOMBSTONE_RATIO_TRIGGER.as_bytes().into(),
                ByteView::from(ratio),
            ),
            (KEY_COMPRESSION.as_bytes().into(), self.compression.encode()),
            (
                KEY_BOTTOMMOST_COMPRESSION.as_bytes().into(),
                self.bottommost_compression.encode(),
            ),
            (KEY_UNIVERSAL.as_bytes().into(), self.universal.encode()),
        ]
    }

    /// Restores a configuration from key-value pairs.
    ///
    /// Missing keys keep their default value, unknown keys are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed.
    pub fn decode_kvs<'a, I: IntoIterator<Item = &'a KvPair>>(kvs: I) -> crate::Result<Self> {
        let mut config = Self::default();

        for (key, value) in kvs {
            let mut bytes: &[u8] = value;

            match &**key {
                k if k == KEY_LEVEL_COUNT.as_bytes() => {
                    config.level_count = bytes.read_u8()?;
                    ensure_consumed(bytes, KEY_LEVEL_COUNT)?;
                }
                k if k == KEY_L0_TRIGGER.as_bytes() => {
                    let n = decode_u64(bytes, KEY_L0_TRIGGER)?;
                    config.level0_file_num_compaction_trigger =
                        u32::try_from(n).unwrap_or(u32::MAX);
                }
                k if k == KEY_MAX_COMPACTION_BYTES.as_bytes() => {
                    config.max_compaction_bytes = decode_u64(bytes, KEY_MAX_COMPACTION_BYTES)?;
                }
                k if k == KEY_TARGET_FILE_SIZE_BASE.as_bytes() => {
                    config.target_file_size_base = decode_u64(bytes, KEY_TARGET_FILE_SIZE_BASE)?;
                }
                k if k == KEY_TARGET_FILE_SIZE_MULTIPLIER.as_bytes() => {
                    let n = decode_u64(bytes, KEY_TARGET_FILE_SIZE_MULTIPLIER)?;
                    config.target_file_size_multiplier = u32::try_from(n).unwrap_or(u32::MAX);
                }
                k if k == KEY_ALLOW_INGEST_BEHIND.as_bytes() => {
                    config.allow_ingest_behind = decode_bool(bytes, KEY_ALLOW_INGEST_BEHIND)?;
                }
                k if k == KEY_PERIODIC_COMPACTION_SECONDS.as_bytes() => {
                    config.periodic_compaction_seconds =
                        decode_u64(bytes, KEY_PERIODIC_COMPACTION_SECONDS)?;
                }
                k if k == KEY_TOMBSTONE_RATIO_TRIGGER.as_bytes() => {
                    config.tombstone_ratio_trigger = match bytes.read_u8()? {
                        0 => None,
                        1 => Some(bytes.read_f32::<LittleEndian>()?),
                        tag => {
                            return Err(DecodeError::InvalidTag((KEY_TOMBSTONE_RATIO_TRIGGER, tag))
                                .into())
                        }
                    };
                    ensure_consumed(bytes, KEY_TOMBSTONE_RATIO_TRIGGER)?;
                }
                k if k == KEY_COMPRESSION.as_bytes() => {
                    config.compression = CompressionPolicy::decode(bytes)?;
                }
                k if k == KEY_BOTTOMMOST_COMPRESSION.as_bytes() => {
                    config.bottommost_compression = Option::<CompressionType>::decode(bytes)?;
                }
                k if k == KEY_UNIVERSAL.as_bytes() => {
                    config.universal = UniversalOptions::decode(bytes)?;
                }
                k => {
                    log::warn!(
                        "Skipping unknown config key {:?}",
                        String::from_utf8_lossy(k)
                    );
                }
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use test_log::test;

    #[test]
    fn roundtrip_compression_policy() -> crate::Result<()> {
        let policy = CompressionPolicy::new([
            CompressionType::None,
            CompressionType::Lz4,
            CompressionType::Miniz(9),
        ]);
        let encoded = policy.encode();
        let decoded = CompressionPolicy::decode(&encoded)?;
        assert_eq!(policy, decoded);
        Ok(())
    }

    #[test]
    fn roundtrip_universal_options() -> crate::Result<()> {
        let options = UniversalOptions {
            size_ratio: 10,
            min_merge_width: 3,
            max_merge_width: 8,
            max_size_amplification_percent: 150,
            compression_size_percent: 60,
            stop_style: StopStyle::SimilarSize,
            allow_trivial_move: true,
            incremental: true,
        };
        let encoded = options.encode();
        let decoded = UniversalOptions::decode(&encoded)?;
        assert_eq!(options, decoded);
        Ok(())
    }

    #[test]
    fn roundtrip_config() -> crate::Result<()> {
        let config = Config::default()
            .level_count(5)
            .level0_file_num_compaction_trigger(8)
            .max_compaction_bytes(0)
            .target_file_size_base(1_024)
            .target_file_size_multiplier(2)
            .allow_ingest_behind(true)
            .periodic_compaction_seconds(86_400)
            .tombstone_ratio_trigger(None)
            .bottommost_compression(Some(CompressionType::Miniz(3)))
            .universal(UniversalOptions {
                incremental: true,
                ..Default::default()
            });

        let kvs = config.encode_kvs();
        let decoded = Config::decode_kvs(&kvs)?;
        assert_eq!(config, decoded);
        Ok(())
    }

    #[test]
    fn decode_config_missing_keys_default() -> crate::Result<()> {
        let decoded = Config::decode_kvs(&Vec::<KvPair>::new())?;
        assert_eq!(Config::default(), decoded);
        Ok(())
    }

    #[test]
    fn decode_invalid_compression_tag() {
        let result = CompressionType::decode(&[7, 0]);
        assert!(matches!(
            result,
            Err(Error::Decode(DecodeError::InvalidTag(("CompressionType", 7))))
        ));
    }

    #[test]
    fn decode_truncated() {
        let result = UniversalOptions::decode(&[1, 0, 0]);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn decode_trailing_bytes() {
        let result = CompressionType::decode(&[1, 0, 0]);
        assert!(matches!(
            result,
            Err(Error::Decode(DecodeError::TrailingBytes(_)))
        ));
    }
}
