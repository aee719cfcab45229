use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{HeaderError, Result};

/// Serialized layout tag of an array mapping
const TAG_ARRAY: u8 = 0;

/// Serialized layout tag of a table mapping
const TAG_TABLE: u8 = 1;

/// Assigns dense integer indices to identifier names
///
/// `Array` holds names where the position is the index and is preferred whenever all
/// identifiers are known up front. `Table` is populated incrementally by registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierTable {
    Array(Vec<String>),
    Table(HashMap<String, u32>),
}
impl Default for IdentifierTable {
    fn default() -> Self {
        Self::Table(HashMap::new())
    }
}
impl IdentifierTable {
    /// Returns the index of `name`, assigning the next free index on first use
    pub fn register(&mut self, name: &str) -> u32 {
        match self {
            Self::Table(table) => {
                let next = table.len() as u32;
                *table.entry(name.to_string()).or_insert(next)
            }
            Self::Array(names) => {
                if let Some(index) = names.iter().position(|n| n == name) {
                    index as u32
                } else {
                    names.push(name.to_string());
                    names.len() as u32 - 1
                }
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Array(names) => names.len(),
            Self::Table(table) => table.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest index assigned so far
    #[must_use]
    pub fn max_index(&self) -> Option<u32> {
        match self {
            Self::Array(names) => names.len().checked_sub(1).map(|i| i as u32),
            Self::Table(table) => table.values().copied().max(),
        }
    }

    /// Builds the two-way lookup used on the read side
    #[must_use]
    pub fn to_mapping(&self) -> IdentifierMapping {
        match self {
            Self::Array(names) => IdentifierMapping::from_pairs(
                names.iter().enumerate().map(|(i, n)| (n.as_str(), i as u32)),
            ),
            Self::Table(table) => {
                IdentifierMapping::from_pairs(table.iter().map(|(n, &i)| (n.as_str(), i)))
            }
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            Self::Array(names) => {
                writer.write_u8(TAG_ARRAY)?;
                writer.write_u32::<LittleEndian>(names.len() as u32)?;
                for name in names {
                    write_string(writer, name)?;
                }
            }
            Self::Table(table) => {
                writer.write_u8(TAG_TABLE)?;
                writer.write_u32::<LittleEndian>(table.len() as u32)?;
                let mut pairs: Vec<_> = table.iter().collect();
                pairs.sort_unstable_by_key(|pair| *pair.1);
                for (name, &index) in pairs {
                    write_string(writer, name)?;
                    writer.write_u32::<LittleEndian>(index)?;
                }
            }
        }
        Ok(())
    }

    /// Reads a mapping whose indices must all lie below `bound`
    pub fn read_from<R: Read>(reader: &mut R, bound: u32) -> Result<Self> {
        match reader.read_u8()? {
            TAG_ARRAY => {
                let n = reader.read_u32::<LittleEndian>()?;
                if n > bound {
                    return Err(HeaderError::IdentifierIndexOutOfBounds {
                        index: n - 1,
                        bound,
                    }
                    .into());
                }
                let names = (0..n)
                    .map(|_| read_string(reader))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::Array(names))
            }
            TAG_TABLE => {
                let n = reader.read_u32::<LittleEndian>()?;
                let mut table = HashMap::new();
                let mut seen = Vec::new();
                for _ in 0..n {
                    let name = read_string(reader)?;
                    let index = reader.read_u32::<LittleEndian>()?;
                    if index >= bound {
                        return Err(HeaderError::IdentifierIndexOutOfBounds { index, bound }.into());
                    }
                    seen.push(index);
                    table.insert(name, index);
                }
                seen.sort_unstable();
                if let Some(pair) = seen.windows(2).find(|pair| pair[0] == pair[1]) {
                    return Err(HeaderError::DuplicateIdentifierIndex(pair[0]).into());
                }
                Ok(Self::Table(table))
            }
            tag => Err(HeaderError::InvalidMappingTag(tag).into()),
        }
    }
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    writer.write_u32::<LittleEndian>(value.len() as u32)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = u64::from(reader.read_u32::<LittleEndian>()?);
    let mut buf = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into());
    }
    Ok(String::from_utf8(buf)?)
}

/// Read-side lookup between identifier names and indices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierMapping {
    by_index: HashMap<u32, String>,
    by_name: HashMap<String, u32>,
}
impl IdentifierMapping {
    fn from_pairs<'a>(pairs: impl Iterator<Item = (&'a str, u32)>) -> Self {
        let mut mapping = Self::default();
        for (name, index) in pairs {
            mapping.by_index.insert(index, name.to_string());
            mapping.by_name.entry(name.to_string()).or_insert(index);
        }
        mapping
    }

    /// Name registered at `index`, if any
    #[must_use]
    pub fn identifier(&self, index: u32) -> Option<&str> {
        self.by_index.get(&index).map(String::as_str)
    }

    /// Index registered for `name`, if any
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Number of named indices
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
