//! Primitive wire encoding (§6.4). Hand-rolled rather than pulled from
//! a framing crate: every value on the wire is either a raw byte span
//! or a `u32` length/count/index, and the engine needs to interleave
//! those writes with raw instance bytes read out of the middle of a
//! script run, which doesn't fit a whole-message serde round-trip.

use std::io::{self, Read, Write};

pub fn write_u32<W: Write>(out: &mut W, value: u32) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

pub fn read_u32<R: Read>(input: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn write_bytes<W: Write>(out: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_u32(out, bytes.len() as u32)?;
    out.write_all(bytes)
}

pub fn read_bytes<R: Read>(input: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u32(input)? as usize;
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_string<W: Write>(out: &mut W, value: &str) -> io::Result<()> {
    write_bytes(out, value.as_bytes())
}

pub fn read_string<R: Read>(input: &mut R) -> io::Result<String> {
    let bytes = read_bytes(input)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
