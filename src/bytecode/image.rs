//! Binary program images (`.rnc` files).
//!
//! An image holds the four program tables framed with little-endian
//! fixed-width integers. Loading appends to an existing [`Program`]:
//! addresses and constant references are shifted by the pre-load table
//! sizes and image-local symbol ids are mapped through the target
//! interner, so several images can be linked into one program.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::bytecode::inst::Inst;
use crate::bytecode::label::Label;
use crate::bytecode::op_code::{ArgKind, OpCode};
use crate::bytecode::program::Program;
use crate::bytecode::symbol::Sym;
use crate::runtime::value::Value;

pub const MAGIC: &[u8; 4] = b"RNLC";
pub const FORMAT_VERSION: u16 = 1;

const TAG_STRING: u8 = b'"';
const TAG_INT: u8 = b'#';

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a program image (bad magic)")]
    BadMagic,
    #[error("unsupported image version {0} (expected {FORMAT_VERSION})")]
    UnsupportedVersion(u16),
    #[error("unknown constant tag 0x{0:02x}")]
    BadConstTag(u8),
    #[error("string is not valid utf-8")]
    BadString,
    #[error("unknown instruction: {0}")]
    UnknownInst(String),
    #[error("symbol reference {0} out of range")]
    BadSymbolRef(usize),
    #[error("instruction {inst} has {got} args, {op} takes {want}")]
    BadArity {
        inst: usize,
        op: &'static str,
        want: usize,
        got: usize,
    },
}

fn read_u16<R: Read>(reader: &mut R) -> Result<u16, LoadError> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, LoadError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i64<R: Read>(reader: &mut R) -> Result<i64, LoadError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_string<R: Read>(reader: &mut R) -> Result<String, LoadError> {
    let len = read_u32(reader)? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| LoadError::BadString)
}

fn read_constant<R: Read>(reader: &mut R) -> Result<Value, LoadError> {
    let mut tag = [0u8; 1];
    reader.read_exact(&mut tag)?;
    match tag[0] {
        TAG_STRING => Ok(Value::string(&read_string(reader)?)),
        TAG_INT => Ok(Value::int(read_i64(reader)?)),
        other => Err(LoadError::BadConstTag(other)),
    }
}

/// Reads one image and links it into `program`.
pub fn read_into<R: Read>(reader: &mut R, program: &mut Program) -> Result<(), LoadError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(LoadError::BadMagic);
    }
    let version = read_u16(reader)?;
    if version != FORMAT_VERSION {
        return Err(LoadError::UnsupportedVersion(version));
    }

    let const_offset = program.constants.len();
    let inst_offset = program.insts.len();

    let num_constants = read_u32(reader)? as usize;
    for _ in 0..num_constants {
        let constant = read_constant(reader)?;
        program.add_constant(constant);
    }

    let num_symbols = read_u32(reader)? as usize;
    let mut symbol_translation = Vec::with_capacity(num_symbols);
    for _ in 0..num_symbols {
        let name = read_string(reader)?;
        symbol_translation.push(program.symbols.sym(&name));
    }

    let num_labels = read_u32(reader)? as usize;
    for _ in 0..num_labels {
        let name = read_string(reader)?;
        let addr = read_u32(reader)? as usize + inst_offset;
        let has_trace = read_u32(reader)?;
        let mut label = Label::new(&name, addr);
        if has_trace == 1 {
            label.trace = Some(read_string(reader)?);
        }
        program.labels.register(label);
    }

    let num_insts = read_u32(reader)? as usize;
    for i in 0..num_insts {
        let command = read_string(reader)?;
        let op = OpCode::from_wire_name(&command)
            .ok_or_else(|| LoadError::UnknownInst(command.clone()))?;

        let num_args = read_u32(reader)? as usize;
        let mut raw_args = Vec::with_capacity(num_args);
        for _ in 0..num_args {
            raw_args.push(read_u32(reader)? as usize);
        }

        let kinds = op.arg_kinds();
        if kinds.len() != raw_args.len() {
            return Err(LoadError::BadArity {
                inst: i + inst_offset,
                op: op.wire_name(),
                want: kinds.len(),
                got: raw_args.len(),
            });
        }

        let mut args = Vec::with_capacity(raw_args.len());
        for (kind, raw) in kinds.iter().zip(raw_args) {
            let arg = match kind {
                ArgKind::Raw => raw,
                ArgKind::Addr => raw + inst_offset,
                ArgKind::Const => raw + const_offset,
                ArgKind::Sym | ArgKind::Intrinsic => symbol_translation
                    .get(raw)
                    .map(|sym| sym.0 as usize)
                    .ok_or(LoadError::BadSymbolRef(raw))?,
            };
            args.push(arg);
        }

        program.insts.push(Inst::new(op, args));
    }

    Ok(())
}

pub fn load_file(path: &Path, program: &mut Program) -> Result<(), LoadError> {
    let mut file = File::open(path)?;
    read_into(&mut file, program)
}

fn write_u16<W: Write>(writer: &mut W, value: u16) -> std::io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn write_u32<W: Write>(writer: &mut W, value: u32) -> std::io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn write_i64<W: Write>(writer: &mut W, value: i64) -> std::io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> std::io::Result<()> {
    write_u32(writer, value.len() as u32)?;
    writer.write_all(value.as_bytes())
}

fn write_constant<W: Write>(writer: &mut W, value: &Value) -> std::io::Result<()> {
    match value {
        Value::String(s) => {
            writer.write_all(&[TAG_STRING])?;
            write_string(writer, s)
        }
        Value::Int(n) => {
            writer.write_all(&[TAG_INT])?;
            write_i64(writer, *n)
        }
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unsupported constant type: {}", other.type_name()),
        )),
    }
}

/// Writes the whole program as a single image. Loading it into an empty
/// program reproduces the tables exactly.
pub fn write<W: Write>(writer: &mut W, program: &Program) -> std::io::Result<()> {
    writer.write_all(MAGIC)?;
    write_u16(writer, FORMAT_VERSION)?;

    write_u32(writer, program.constants.len() as u32)?;
    for constant in &program.constants {
        write_constant(writer, constant)?;
    }

    write_u32(writer, program.symbols.len() as u32)?;
    for (_, name) in program.symbols.iter() {
        write_string(writer, name)?;
    }

    write_u32(writer, program.labels.len() as u32)?;
    for label in program.labels.iter() {
        write_string(writer, &label.name)?;
        write_u32(writer, label.addr as u32)?;
        match &label.trace {
            Some(trace) => {
                write_u32(writer, 1)?;
                write_string(writer, trace)?;
            }
            None => write_u32(writer, 0)?,
        }
    }

    write_u32(writer, program.insts.len() as u32)?;
    for inst in &program.insts {
        write_string(writer, inst.op.wire_name())?;
        write_u32(writer, inst.args.len() as u32)?;
        for &arg in &inst.args {
            write_u32(writer, arg as u32)?;
        }
    }

    Ok(())
}

pub fn write_file(path: &Path, program: &Program) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    write(&mut file, program)
}
