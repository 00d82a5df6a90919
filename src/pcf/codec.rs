use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{
    kind, Header, Parameter, PcfError, PcfMessage, HEADER_LENGTH, INTEGER_LENGTH,
    INTEGER_LIST_FIXED_LENGTH, STRING_FIXED_LENGTH,
};

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

fn encoded_length(parameter: &Parameter) -> usize {
    match parameter {
        Parameter::Integer { .. } => INTEGER_LENGTH,
        Parameter::String { value, .. } => STRING_FIXED_LENGTH + padded(value.len()),
        Parameter::IntegerList { values, .. } => INTEGER_LIST_FIXED_LENGTH + 4 * values.len(),
        Parameter::Unknown { length, .. } => (*length).max(8),
    }
}

pub fn encode(message: &PcfMessage) -> Bytes {
    let body: usize = message.parameters.iter().map(encoded_length).sum();
    let mut dst = BytesMut::with_capacity(HEADER_LENGTH + body);

    let header = &message.header;
    dst.put_i32_le(header.kind);
    dst.put_i32_le(HEADER_LENGTH as i32);
    dst.put_i32_le(header.version);
    dst.put_i32_le(header.command);
    dst.put_i32_le(header.sequence);
    dst.put_i32_le(if header.last { 1 } else { 0 });
    dst.put_i32_le(header.completion);
    dst.put_i32_le(header.reason);
    dst.put_i32_le(message.parameters.len() as i32);

    for parameter in &message.parameters {
        let length = encoded_length(parameter);
        match parameter {
            Parameter::Integer { id, value } => {
                dst.put_i32_le(kind::INTEGER);
                dst.put_i32_le(length as i32);
                dst.put_i32_le(*id);
                dst.put_i32_le(*value);
            }
            Parameter::String { id, ccsid, value } => {
                dst.put_i32_le(kind::STRING);
                dst.put_i32_le(length as i32);
                dst.put_i32_le(*id);
                dst.put_i32_le(*ccsid);
                dst.put_i32_le(value.len() as i32);
                dst.put_slice(value.as_bytes());
                dst.put_bytes(0, padded(value.len()) - value.len());
            }
            Parameter::IntegerList { id, values } => {
                dst.put_i32_le(kind::INTEGER_LIST);
                dst.put_i32_le(length as i32);
                dst.put_i32_le(*id);
                dst.put_i32_le(values.len() as i32);
                for value in values {
                    dst.put_i32_le(*value);
                }
            }
            Parameter::Unknown { kind, .. } => {
                dst.put_i32_le(*kind);
                dst.put_i32_le(length as i32);
                dst.put_bytes(0, length - 8);
            }
        }
    }

    dst.freeze()
}

/// Reads fields from a slice, tracking the absolute offset for error reports.
struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn ensure(&self, needed: usize) -> Result<(), PcfError> {
        if self.buf.remaining() < needed {
            return Err(PcfError::Short {
                offset: self.offset,
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn i32(&mut self) -> Result<i32, PcfError> {
        self.ensure(4)?;
        self.offset += 4;
        Ok(self.buf.get_i32_le())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], PcfError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        self.offset += len;
        Ok(head)
    }
}

fn read_header(reader: &mut Reader<'_>) -> Result<Header, PcfError> {
    reader.ensure(HEADER_LENGTH)?;
    let kind = reader.i32()?;
    let struc_length = reader.i32()?;
    if struc_length as usize != HEADER_LENGTH {
        return Err(PcfError::BadLength {
            offset: 4,
            length: struc_length,
        });
    }
    Ok(Header {
        kind,
        version: reader.i32()?,
        command: reader.i32()?,
        sequence: reader.i32()?,
        last: reader.i32()? == 1,
        completion: reader.i32()?,
        reason: reader.i32()?,
        parameter_count: reader.i32()?,
    })
}

fn read_parameter(reader: &mut Reader<'_>) -> Result<Parameter, PcfError> {
    let start = reader.offset;
    reader.ensure(8)?;
    let kind = reader.i32()?;
    let length = reader.i32()?;
    if length < 8 {
        return Err(PcfError::BadLength {
            offset: start,
            length,
        });
    }
    let mut body = Reader {
        buf: reader.take(length as usize - 8)?,
        offset: start + 8,
    };
    let bad_length = PcfError::BadLength {
        offset: start,
        length,
    };

    let parameter = match kind {
        kind::INTEGER => {
            if (length as usize) < INTEGER_LENGTH {
                return Err(bad_length);
            }
            Parameter::Integer {
                id: body.i32()?,
                value: body.i32()?,
            }
        }
        kind::STRING => {
            if (length as usize) < STRING_FIXED_LENGTH {
                return Err(bad_length);
            }
            let id = body.i32()?;
            let ccsid = body.i32()?;
            let string_length = body.i32()?;
            if string_length < 0 || STRING_FIXED_LENGTH + string_length as usize > length as usize {
                return Err(bad_length);
            }
            let raw = body.take(string_length as usize)?;
            let value = String::from_utf8_lossy(raw)
                .trim_end_matches([' ', '\0'])
                .to_string();
            Parameter::String { id, ccsid, value }
        }
        kind::INTEGER_LIST => {
            if (length as usize) < INTEGER_LIST_FIXED_LENGTH {
                return Err(bad_length);
            }
            let id = body.i32()?;
            let count = body.i32()?;
            if count < 0 || INTEGER_LIST_FIXED_LENGTH + 4 * count as usize > length as usize {
                return Err(bad_length);
            }
            let values = (0..count).map(|_| body.i32()).collect::<Result<Vec<_>, _>>()?;
            Parameter::IntegerList { id, values }
        }
        other => Parameter::Unknown {
            kind: other,
            length: length as usize,
        },
    };
    Ok(parameter)
}

/// Decodes a command or response.
///
/// For a response whose completion code is not OK only the header is read;
/// the parameters of a failed reply are not used.
pub fn decode(buf: &[u8]) -> Result<PcfMessage, PcfError> {
    let mut reader = Reader::new(buf);
    let header = read_header(&mut reader)?;
    if header.kind != kind::COMMAND && header.kind != kind::RESPONSE {
        return Err(PcfError::NotAdmin(header.kind));
    }

    let mut message = PcfMessage::new(header);
    if message.header.kind == kind::RESPONSE && message.header.completion != 0 {
        return Ok(message);
    }

    // Smallest parameter is a type and a length field.
    let count = message.header.parameter_count.max(0) as usize;
    message.parameters.reserve(count.min(reader.buf.remaining() / 8));
    for _ in 0..count {
        let parameter = read_parameter(&mut reader)?;
        message.parameters.push(parameter);
    }
    Ok(message)
}
