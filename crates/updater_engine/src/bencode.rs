//! Minimal bencode decoder.
//!
//! Values borrow from the input. Dictionaries keep the raw byte span they
//! were decoded from, which is what identity hashing needs.

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected end of input at byte {offset}")]
    UnexpectedEnd { offset: usize },
    #[error("unexpected byte 0x{byte:02x} at byte {offset}")]
    UnexpectedByte { byte: u8, offset: usize },
    #[error("invalid integer at byte {offset}")]
    InvalidInteger { offset: usize },
    #[error("trailing data at byte {offset}")]
    TrailingData { offset: usize },
    #[error("nesting deeper than {} levels", MAX_DEPTH)]
    TooDeep,
    #[error("top-level value is not a dictionary")]
    NotADictionary,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` has the wrong type")]
    InvalidField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value<'a> {
    Int(i64),
    Bytes(&'a [u8]),
    List(Vec<Value<'a>>),
    Dict(Dict<'a>),
}

impl<'a> Value<'a> {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value<'a>]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict<'a>> {
        match self {
            Value::Dict(dict) => Some(dict),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dict<'a> {
    entries: Vec<(&'a [u8], Value<'a>)>,
    raw: &'a [u8],
}

impl<'a> Dict<'a> {
    /// First value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<&Value<'a>> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, value)| value)
    }

    /// The exact encoded bytes of this dictionary, delimiters included.
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decodes exactly one value spanning the whole input.
pub fn decode(input: &[u8]) -> Result<Value<'_>, ParseError> {
    let mut decoder = Decoder { input, pos: 0 };
    let value = decoder.value(0)?;
    if decoder.pos != input.len() {
        return Err(ParseError::TrailingData {
            offset: decoder.pos,
        });
    }
    Ok(value)
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8, ParseError> {
        self.input
            .get(self.pos)
            .copied()
            .ok_or(ParseError::UnexpectedEnd { offset: self.pos })
    }

    fn value(&mut self, depth: usize) -> Result<Value<'a>, ParseError> {
        if depth > MAX_DEPTH {
            return Err(ParseError::TooDeep);
        }
        match self.peek()? {
            b'i' => {
                self.pos += 1;
                let n = self.integer_until(b'e')?;
                Ok(Value::Int(n))
            }
            b'l' => {
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(Value::List(items))
            }
            b'd' => {
                let start = self.pos;
                self.pos += 1;
                let mut entries = Vec::new();
                while self.peek()? != b'e' {
                    let key = self.byte_string()?;
                    let value = self.value(depth + 1)?;
                    entries.push((key, value));
                }
                self.pos += 1;
                Ok(Value::Dict(Dict {
                    entries,
                    raw: &self.input[start..self.pos],
                }))
            }
            b'0'..=b'9' => self.byte_string().map(Value::Bytes),
            byte => Err(ParseError::UnexpectedByte {
                byte,
                offset: self.pos,
            }),
        }
    }

    fn byte_string(&mut self) -> Result<&'a [u8], ParseError> {
        let offset = self.pos;
        let byte = self.peek()?;
        if !byte.is_ascii_digit() {
            return Err(ParseError::UnexpectedByte { byte, offset });
        }
        let len = self.integer_until(b':')?;
        let len = usize::try_from(len).map_err(|_| ParseError::InvalidInteger { offset })?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.input.len())
            .ok_or(ParseError::UnexpectedEnd {
                offset: self.input.len(),
            })?;
        let bytes = &self.input[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn integer_until(&mut self, terminator: u8) -> Result<i64, ParseError> {
        let offset = self.pos;
        let rest = &self.input[self.pos..];
        let len = rest
            .iter()
            .position(|b| *b == terminator)
            .ok_or(ParseError::UnexpectedEnd {
                offset: self.input.len(),
            })?;
        let digits = std::str::from_utf8(&rest[..len])
            .map_err(|_| ParseError::InvalidInteger { offset })?;
        if digits.is_empty() || digits.starts_with('+') || digits == "-0" {
            return Err(ParseError::InvalidInteger { offset });
        }
        let n = digits
            .parse::<i64>()
            .map_err(|_| ParseError::InvalidInteger { offset })?;
        self.pos += len + 1;
        Ok(n)
    }
}
