//! Binary persistence for compiled programs.
//!
//! Little-endian layout: a 16-byte header (magic `PEXB`, major/minor
//! version, flags, reserved byte, u32 entry index, u32 reserved), then
//! count-prefixed sections in order: constant pool, name table, function
//! templates, code, and — when flag bit 0x01 is set — a debug blob this
//! implementation skips on read and never writes. Strings are
//! length-prefixed UTF-8. Trailing bytes are an error.

use std::fmt;

use super::program::{Constant, FunctionTemplate, Program, UpvalueSpec};

/// `PEXB` as a little-endian u32.
const MAGIC: u32 = 0x5045_5842;
const FORMAT_MAJOR: u8 = 1;
const FORMAT_MINOR: u8 = 0;
const FLAG_DEBUG_INFO: u8 = 0x01;

const TAG_NULL: u8 = 0;
const TAG_TRUE: u8 = 1;
const TAG_FALSE: u8 = 2;
const TAG_INT32: u8 = 3;
const TAG_FLOAT64: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_REGEX: u8 = 6;

/// A malformed or incompatible bytecode image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BytecodeReadError {
    BadMagic,
    UnsupportedVersion { major: u8, minor: u8 },
    /// The image ended before a declared field or section.
    Truncated,
    InvalidUtf8,
    UnknownConstantTag(u8),
    /// An upvalue `is_local` byte other than 0 or 1.
    InvalidUpvalueFlag(u8),
    InvalidEntryPoint(u32),
    /// Template `index` declares a code range outside the code section.
    CodeRangeOutOfBounds { template: usize },
    /// Template `index` declares a name index outside the name table.
    InvalidNameIndex { template: usize },
    /// Template `index` declares fewer locals than parameters.
    LocalsBelowParams { template: usize },
    TrailingBytes(usize),
}

impl fmt::Display for BytecodeReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => f.write_str("not a PEX bytecode image (bad magic)"),
            Self::UnsupportedVersion { major, minor } => {
                write!(f, "unsupported bytecode version {major}.{minor} (expected {FORMAT_MAJOR}.x)")
            }
            Self::Truncated => f.write_str("truncated bytecode image"),
            Self::InvalidUtf8 => f.write_str("invalid UTF-8 in string data"),
            Self::UnknownConstantTag(tag) => write!(f, "unknown constant tag {tag}"),
            Self::InvalidUpvalueFlag(byte) => write!(f, "invalid upvalue flag byte {byte}"),
            Self::InvalidEntryPoint(index) => write!(f, "entry point {index} is not a valid template"),
            Self::CodeRangeOutOfBounds { template } => {
                write!(f, "template {template} code range lies outside the code section")
            }
            Self::InvalidNameIndex { template } => {
                write!(f, "template {template} name index lies outside the name table")
            }
            Self::LocalsBelowParams { template } => {
                write!(f, "template {template} declares fewer locals than parameters")
            }
            Self::TrailingBytes(count) => write!(f, "{count} trailing bytes after the final section"),
        }
    }
}

impl std::error::Error for BytecodeReadError {}

/// Serializes a program to the on-disk format.
#[must_use]
pub fn write(program: &Program) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + program.code.len());

    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.push(FORMAT_MAJOR);
    out.push(FORMAT_MINOR);
    out.push(0); // flags: no debug info
    out.push(0); // reserved
    out.extend_from_slice(&program.entry.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // reserved

    out.extend_from_slice(&(program.constants.len() as u32).to_le_bytes());
    for constant in &program.constants {
        match constant {
            Constant::Null => out.push(TAG_NULL),
            Constant::True => out.push(TAG_TRUE),
            Constant::False => out.push(TAG_FALSE),
            Constant::Int(v) => {
                out.push(TAG_INT32);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Constant::Float(v) => {
                out.push(TAG_FLOAT64);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Constant::Str(s) => {
                out.push(TAG_STRING);
                write_str(&mut out, s);
            }
            Constant::Regex { pattern, flags } => {
                out.push(TAG_REGEX);
                write_str(&mut out, pattern);
                write_str(&mut out, flags);
            }
        }
    }

    out.extend_from_slice(&(program.names.len() as u32).to_le_bytes());
    for name in &program.names {
        write_str(&mut out, name);
    }

    out.extend_from_slice(&(program.templates.len() as u32).to_le_bytes());
    for template in &program.templates {
        out.extend_from_slice(&template.name_index.to_le_bytes());
        out.extend_from_slice(&template.param_count.to_le_bytes());
        out.extend_from_slice(&template.local_count.to_le_bytes());
        out.extend_from_slice(&(template.upvalues.len() as u32).to_le_bytes());
        for spec in &template.upvalues {
            out.push(u8::from(spec.is_local));
            out.extend_from_slice(&spec.index.to_le_bytes());
        }
        out.extend_from_slice(&template.code_offset.to_le_bytes());
        out.extend_from_slice(&template.code_length.to_le_bytes());
    }

    out.extend_from_slice(&(program.code.len() as u32).to_le_bytes());
    out.extend_from_slice(&program.code);

    out
}

/// Deserializes and validates a program image.
pub fn read(bytes: &[u8]) -> Result<Program, BytecodeReadError> {
    let mut r = Reader { bytes, pos: 0 };

    if r.u32()? != MAGIC {
        return Err(BytecodeReadError::BadMagic);
    }
    let major = r.u8()?;
    let minor = r.u8()?;
    if major != FORMAT_MAJOR {
        return Err(BytecodeReadError::UnsupportedVersion { major, minor });
    }
    let flags = r.u8()?;
    let _reserved = r.u8()?;
    let entry = r.u32()?;
    let _reserved = r.u32()?;

    let constant_count = r.u32()? as usize;
    let mut constants = Vec::with_capacity(constant_count.min(1 << 16));
    for _ in 0..constant_count {
        let tag = r.u8()?;
        constants.push(match tag {
            TAG_NULL => Constant::Null,
            TAG_TRUE => Constant::True,
            TAG_FALSE => Constant::False,
            TAG_INT32 => Constant::Int(r.i32()?),
            TAG_FLOAT64 => Constant::Float(r.f64()?),
            TAG_STRING => Constant::Str(r.str()?),
            TAG_REGEX => Constant::Regex {
                pattern: r.str()?,
                flags: r.str()?,
            },
            other => return Err(BytecodeReadError::UnknownConstantTag(other)),
        });
    }

    let name_count = r.u32()? as usize;
    let mut names = Vec::with_capacity(name_count.min(1 << 16));
    for _ in 0..name_count {
        names.push(r.str()?);
    }

    let template_count = r.u32()? as usize;
    let mut templates = Vec::with_capacity(template_count.min(1 << 16));
    for template in 0..template_count {
        let name_index = r.i32()?;
        let param_count = r.u32()?;
        let local_count = r.u32()?;
        let upvalue_count = r.u32()? as usize;
        let mut upvalues = Vec::with_capacity(upvalue_count.min(1 << 16));
        for _ in 0..upvalue_count {
            let is_local = match r.u8()? {
                0 => false,
                1 => true,
                other => return Err(BytecodeReadError::InvalidUpvalueFlag(other)),
            };
            upvalues.push(UpvalueSpec {
                is_local,
                index: r.u32()?,
            });
        }
        let code_offset = r.u32()?;
        let code_length = r.u32()?;

        if name_index < -1 || (name_index >= 0 && name_index as usize >= names.len()) {
            return Err(BytecodeReadError::InvalidNameIndex { template });
        }
        if local_count < param_count {
            return Err(BytecodeReadError::LocalsBelowParams { template });
        }
        templates.push(FunctionTemplate {
            name_index,
            param_count,
            local_count,
            upvalues,
            code_offset,
            code_length,
        });
    }

    let code_len = r.u32()? as usize;
    let code = r.take(code_len)?.to_vec();

    if flags & FLAG_DEBUG_INFO != 0 {
        let debug_len = r.u32()? as usize;
        let _ = r.take(debug_len)?;
    }

    if r.pos != bytes.len() {
        return Err(BytecodeReadError::TrailingBytes(bytes.len() - r.pos));
    }

    if entry as usize >= templates.len() {
        return Err(BytecodeReadError::InvalidEntryPoint(entry));
    }
    for (index, template) in templates.iter().enumerate() {
        let end = u64::from(template.code_offset) + u64::from(template.code_length);
        if end > code.len() as u64 {
            return Err(BytecodeReadError::CodeRangeOutOfBounds { template: index });
        }
    }

    Ok(Program {
        constants,
        names,
        templates,
        code,
        entry,
    })
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], BytecodeReadError> {
        let end = self.pos.checked_add(len).ok_or(BytecodeReadError::Truncated)?;
        if end > self.bytes.len() {
            return Err(BytecodeReadError::Truncated);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, BytecodeReadError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, BytecodeReadError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, BytecodeReadError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self) -> Result<f64, BytecodeReadError> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn str(&mut self) -> Result<String, BytecodeReadError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| BytecodeReadError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        Program {
            constants: vec![
                Constant::Int(42),
                Constant::Float(2.5),
                Constant::Str("hi".into()),
                Constant::Regex {
                    pattern: "a+".into(),
                    flags: "i".into(),
                },
            ],
            names: vec!["len".into(), "print".into()],
            templates: vec![FunctionTemplate {
                name_index: -1,
                param_count: 1,
                local_count: 2,
                upvalues: vec![UpvalueSpec {
                    is_local: true,
                    index: 0,
                }],
                code_offset: 0,
                code_length: 3,
            }],
            code: vec![0x0c, 0x00, 0x33],
            entry: 0,
        }
    }

    #[test]
    fn round_trip() {
        let program = sample();
        let bytes = write(&program);
        assert_eq!(read(&bytes).unwrap(), program);
    }

    #[test]
    fn magic_spells_pexb() {
        let bytes = write(&sample());
        assert_eq!(&bytes[0..4], b"BXEP");
    }

    #[test]
    fn bad_magic() {
        let mut bytes = write(&sample());
        bytes[0] ^= 0xff;
        assert_eq!(read(&bytes).unwrap_err(), BytecodeReadError::BadMagic);
    }

    #[test]
    fn version_mismatch() {
        let mut bytes = write(&sample());
        bytes[4] = FORMAT_MAJOR + 1;
        assert!(matches!(
            read(&bytes).unwrap_err(),
            BytecodeReadError::UnsupportedVersion { .. }
        ));
    }

    #[test]
    fn truncation_at_every_prefix() {
        let bytes = write(&sample());
        for len in 0..bytes.len() {
            assert_eq!(
                read(&bytes[..len]).unwrap_err(),
                BytecodeReadError::Truncated,
                "prefix of {len} bytes"
            );
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = write(&sample());
        bytes.push(0);
        assert_eq!(read(&bytes).unwrap_err(), BytecodeReadError::TrailingBytes(1));
    }

    #[test]
    fn unknown_constant_tag() {
        let mut bytes = write(&sample());
        // First constant tag sits right after the header and pool count.
        bytes[20] = 99;
        assert!(matches!(
            read(&bytes).unwrap_err(),
            BytecodeReadError::UnknownConstantTag(99) | BytecodeReadError::Truncated
        ));
    }

    #[test]
    fn invalid_entry_point() {
        let mut program = sample();
        program.entry = 5;
        let bytes = write(&program);
        assert_eq!(read(&bytes).unwrap_err(), BytecodeReadError::InvalidEntryPoint(5));
    }

    #[test]
    fn code_range_out_of_bounds() {
        let mut program = sample();
        program.templates[0].code_length = 100;
        let bytes = write(&program);
        assert_eq!(
            read(&bytes).unwrap_err(),
            BytecodeReadError::CodeRangeOutOfBounds { template: 0 }
        );
    }

    #[test]
    fn invalid_utf8_in_name() {
        let program = sample();
        let mut bytes = write(&program);
        // Corrupt the first byte of the first name's payload ("len"). Find
        // it by searching for the encoded string.
        let pos = bytes.windows(3).position(|w| w == b"len").unwrap();
        bytes[pos] = 0xff;
        assert_eq!(read(&bytes).unwrap_err(), BytecodeReadError::InvalidUtf8);
    }

    #[test]
    fn locals_below_params_is_rejected() {
        let mut program = sample();
        program.templates[0].local_count = 0;
        let bytes = write(&program);
        assert_eq!(
            read(&bytes).unwrap_err(),
            BytecodeReadError::LocalsBelowParams { template: 0 }
        );
    }
}
