//! 二进制编码/解码
//!
//! MessagePack 兼容的紧凑 map 编码。编码端总是选择能容纳该值的最短表示；
//! 解码端接受该家族的全部标记（tracker 端的编码器会混用 uint/int 标记）。
//!
//! 不支持 ext 家族（0xC7-0xC9、0xD4-0xD8）——协议从未使用，遇到即报错。

use crate::ProtocolError;
use crate::value::Value;

/// 嵌套深度上限（calibration 请求里最深为 map→map→array→map，三层富余）
const MAX_DEPTH: usize = 32;

/// 编码单个值
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    encode_into(value, &mut buf);
    buf
}

/// 解码单个值
///
/// 输入必须恰好是一个完整的值：尾部有剩余字节视为 `TrailingBytes`。
pub fn decode(bytes: &[u8]) -> Result<Value, ProtocolError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let value = cursor.read_value(0)?;
    if cursor.pos != bytes.len() {
        return Err(ProtocolError::TrailingBytes {
            remaining: bytes.len() - cursor.pos,
        });
    }
    Ok(value)
}

fn encode_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Nil => buf.push(0xC0),
        Value::Bool(false) => buf.push(0xC2),
        Value::Bool(true) => buf.push(0xC3),
        Value::Int(i) => encode_int(*i, buf),
        Value::F64(f) => {
            buf.push(0xCB);
            buf.extend_from_slice(&f.to_be_bytes());
        },
        Value::Str(s) => {
            let len = s.len();
            if len <= 31 {
                buf.push(0xA0 | len as u8);
            } else if len <= u8::MAX as usize {
                buf.push(0xD9);
                buf.push(len as u8);
            } else if len <= u16::MAX as usize {
                buf.push(0xDA);
                buf.extend_from_slice(&(len as u16).to_be_bytes());
            } else {
                buf.push(0xDB);
                buf.extend_from_slice(&(len as u32).to_be_bytes());
            }
            buf.extend_from_slice(s.as_bytes());
        },
        Value::Bin(data) => {
            let len = data.len();
            if len <= u8::MAX as usize {
                buf.push(0xC4);
                buf.push(len as u8);
            } else if len <= u16::MAX as usize {
                buf.push(0xC5);
                buf.extend_from_slice(&(len as u16).to_be_bytes());
            } else {
                buf.push(0xC6);
                buf.extend_from_slice(&(len as u32).to_be_bytes());
            }
            buf.extend_from_slice(data);
        },
        Value::Array(items) => {
            let len = items.len();
            if len <= 15 {
                buf.push(0x90 | len as u8);
            } else if len <= u16::MAX as usize {
                buf.push(0xDC);
                buf.extend_from_slice(&(len as u16).to_be_bytes());
            } else {
                buf.push(0xDD);
                buf.extend_from_slice(&(len as u32).to_be_bytes());
            }
            for item in items {
                encode_into(item, buf);
            }
        },
        Value::Map(pairs) => {
            let len = pairs.len();
            if len <= 15 {
                buf.push(0x80 | len as u8);
            } else if len <= u16::MAX as usize {
                buf.push(0xDE);
                buf.extend_from_slice(&(len as u16).to_be_bytes());
            } else {
                buf.push(0xDF);
                buf.extend_from_slice(&(len as u32).to_be_bytes());
            }
            for (key, val) in pairs {
                encode_into(&Value::Str(key.clone()), buf);
                encode_into(val, buf);
            }
        },
    }
}

/// 整数编码：选择最短表示
fn encode_int(i: i64, buf: &mut Vec<u8>) {
    if (0..=0x7F).contains(&i) {
        // positive fixint
        buf.push(i as u8);
    } else if (-32..0).contains(&i) {
        // negative fixint
        buf.push(i as u8);
    } else if i >= 0 {
        if i <= u8::MAX as i64 {
            buf.push(0xCC);
            buf.push(i as u8);
        } else if i <= u16::MAX as i64 {
            buf.push(0xCD);
            buf.extend_from_slice(&(i as u16).to_be_bytes());
        } else if i <= u32::MAX as i64 {
            buf.push(0xCE);
            buf.extend_from_slice(&(i as u32).to_be_bytes());
        } else {
            buf.push(0xD3);
            buf.extend_from_slice(&i.to_be_bytes());
        }
    } else if i >= i8::MIN as i64 {
        buf.push(0xD0);
        buf.push(i as i8 as u8);
    } else if i >= i16::MIN as i64 {
        buf.push(0xD1);
        buf.extend_from_slice(&(i as i16).to_be_bytes());
    } else if i >= i32::MIN as i64 {
        buf.push(0xD2);
        buf.extend_from_slice(&(i as i32).to_be_bytes());
    } else {
        buf.push(0xD3);
        buf.extend_from_slice(&i.to_be_bytes());
    }
}

/// 解码游标（只前进，出错不回退也不产生部分结果）
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let remaining = self.bytes.len() - self.pos;
        if remaining < n {
            return Err(ProtocolError::Truncated {
                expected: n,
                actual: remaining,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn take_u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_u64(&mut self) -> Result<u64, ProtocolError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn take_str(&mut self, len: usize) -> Result<String, ProtocolError> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, ProtocolError> {
        if depth > MAX_DEPTH {
            return Err(ProtocolError::DepthExceeded(MAX_DEPTH));
        }
        let marker = self.take_u8()?;
        let value = match marker {
            // fixint
            0x00..=0x7F => Value::Int(marker as i64),
            0xE0..=0xFF => Value::Int(marker as i8 as i64),

            // fixstr / fixmap / fixarray
            0xA0..=0xBF => Value::Str(self.take_str((marker & 0x1F) as usize)?),
            0x80..=0x8F => self.read_map((marker & 0x0F) as usize, depth)?,
            0x90..=0x9F => self.read_array((marker & 0x0F) as usize, depth)?,

            0xC0 => Value::Nil,
            0xC2 => Value::Bool(false),
            0xC3 => Value::Bool(true),

            // bin 8/16/32
            0xC4 => {
                let len = self.take_u8()? as usize;
                Value::Bin(self.take(len)?.to_vec())
            },
            0xC5 => {
                let len = self.take_u16()? as usize;
                Value::Bin(self.take(len)?.to_vec())
            },
            0xC6 => {
                let len = self.take_u32()? as usize;
                Value::Bin(self.take(len)?.to_vec())
            },

            // float 32/64
            0xCA => {
                let b = self.take(4)?;
                Value::F64(f32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64)
            },
            0xCB => {
                let b = self.take(8)?;
                Value::F64(f64::from_be_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ]))
            },

            // uint 8/16/32/64
            0xCC => Value::Int(self.take_u8()? as i64),
            0xCD => Value::Int(self.take_u16()? as i64),
            0xCE => Value::Int(self.take_u32()? as i64),
            0xCF => {
                let v = self.take_u64()?;
                i64::try_from(v)
                    .map(Value::Int)
                    .map_err(|_| ProtocolError::IntegerOverflow)?
            },

            // int 8/16/32/64
            0xD0 => Value::Int(self.take_u8()? as i8 as i64),
            0xD1 => Value::Int(self.take_u16()? as i16 as i64),
            0xD2 => Value::Int(self.take_u32()? as i32 as i64),
            0xD3 => Value::Int(self.take_u64()? as i64),

            // str 8/16/32
            0xD9 => {
                let len = self.take_u8()? as usize;
                Value::Str(self.take_str(len)?)
            },
            0xDA => {
                let len = self.take_u16()? as usize;
                Value::Str(self.take_str(len)?)
            },
            0xDB => {
                let len = self.take_u32()? as usize;
                Value::Str(self.take_str(len)?)
            },

            // array 16/32
            0xDC => {
                let len = self.take_u16()? as usize;
                self.read_array(len, depth)?
            },
            0xDD => {
                let len = self.take_u32()? as usize;
                self.read_array(len, depth)?
            },

            // map 16/32
            0xDE => {
                let len = self.take_u16()? as usize;
                self.read_map(len, depth)?
            },
            0xDF => {
                let len = self.take_u32()? as usize;
                self.read_map(len, depth)?
            },

            // 0xC1 保留、ext 家族不支持
            other => return Err(ProtocolError::UnsupportedMarker { marker: other }),
        };
        Ok(value)
    }

    fn read_array(&mut self, len: usize, depth: usize) -> Result<Value, ProtocolError> {
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.read_value(depth + 1)?);
        }
        Ok(Value::Array(items))
    }

    fn read_map(&mut self, len: usize, depth: usize) -> Result<Value, ProtocolError> {
        let mut pairs = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = match self.read_value(depth + 1)? {
                Value::Str(s) => s,
                _ => return Err(ProtocolError::NonStringKey),
            };
            let value = self.read_value(depth + 1)?;
            pairs.push((key, value));
        }
        Ok(Value::Map(pairs))
    }
}
