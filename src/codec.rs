// Copyright 2019 Zhizhesihai (Beijing) Technology Limited.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

//! Utility functions for reading and writing versioned headers.
//!
//! Writing codec headers is useful to ensure that a stream is in the format
//! you think it is.

use error::ErrorKind::{CorruptIndex, IllegalArgument};
use error::Result;
use io::{DataInput, DataOutput};

/// Constant to identify the start of a codec header.
pub const CODEC_MAGIC: i32 = 0x3FD7_6C17;

/// Writes a codec header, which records both a string to identify the
/// stream and a version number.
///
/// CodecHeader --> Magic,CodecName,Version
/// * Magic --> `write_int`. This identifies the start of the header. It is
///   always `CODEC_MAGIC`.
/// * CodecName --> `write_string`. This is a string to identify this stream.
/// * Version --> `write_int`. Records the version of the stream.
pub fn write_header<T: DataOutput + ?Sized>(out: &mut T, codec: &str, version: i32) -> Result<()> {
    let clen = codec.len();
    if clen >= 128 {
        bail!(IllegalArgument(format!(
            "codec must be simple ASCII less than 128 characters, got {}[length={}]",
            codec, clen,
        )));
    }
    out.write_int(CODEC_MAGIC)?;
    out.write_string(codec)?;
    out.write_int(version)
}

/// Reads and validates a header previously written with `write_header`.
///
/// When reading a stream, supply the expected codec name and an expected
/// version range (`min_ver` to `max_ver`).
pub fn check_header<T: DataInput + ?Sized>(
    data_input: &mut T,
    codec: &str,
    min_ver: i32,
    max_ver: i32,
) -> Result<i32> {
    let actual_header = data_input.read_int()?;
    if actual_header != CODEC_MAGIC {
        bail!(CorruptIndex(format!(
            "codec header mismatch: actual=0x{:X}, expected=0x{:X}",
            actual_header, CODEC_MAGIC
        )));
    }
    let actual_codec = data_input.read_string()?;
    if actual_codec != codec {
        bail!(CorruptIndex(format!(
            "codec mismatch: actual={}, expected={}",
            actual_codec, codec
        )));
    }
    let actual_ver = data_input.read_int()?;
    if actual_ver < min_ver || actual_ver > max_ver {
        bail!(CorruptIndex(format!(
            "format either too new or too old: {} <= {} <= {} doesn't hold",
            min_ver, actual_ver, max_ver
        )));
    }
    Ok(actual_ver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use io::ByteArrayDataInput;

    #[test]
    fn test_header_round_trip() {
        let mut out: Vec<u8> = Vec::new();
        write_header(&mut out, "FST", 4).unwrap();
        let mut input = ByteArrayDataInput::new(&out[..]);
        assert_eq!(check_header(&mut input, "FST", 3, 4).unwrap(), 4);
    }

    #[test]
    fn test_bad_magic() {
        let bytes = vec![0u8; 16];
        let mut input = ByteArrayDataInput::new(&bytes[..]);
        assert!(check_header(&mut input, "FST", 3, 4).is_err());
    }

    #[test]
    fn test_version_out_of_range() {
        let mut out: Vec<u8> = Vec::new();
        write_header(&mut out, "FST", 9).unwrap();
        let mut input = ByteArrayDataInput::new(&out[..]);
        assert!(check_header(&mut input, "FST", 3, 4).is_err());
    }

    #[test]
    fn test_codec_name_mismatch() {
        let mut out: Vec<u8> = Vec::new();
        write_header(&mut out, "FST", 4).unwrap();
        let mut input = ByteArrayDataInput::new(&out[..]);
        assert!(check_header(&mut input, "NOTFST", 3, 4).is_err());
    }
}
