//! A reader for the parts of a dex container needed to fingerprint classes.
//!
//! The id tables, class definitions, class data, code items with their
//! try/catch handlers, and static field values are read. Annotations and
//! debug info are not, so changes limited to them do not change a class
//! fingerprint.

use crate::format::reader::{ByteReader, le_u16, le_u32};
use crate::{Error, Result};

/// Size of the dex header.
pub const HEADER_SIZE: usize = 0x70;

const MAGIC_PREFIX: &[u8; 4] = b"dex\n";
const NO_INDEX: u32 = 0xffff_ffff;

const STRING_ID_SIZE: usize = 4;
const TYPE_ID_SIZE: usize = 4;
const PROTO_ID_SIZE: usize = 12;
const FIELD_ID_SIZE: usize = 8;
const METHOD_ID_SIZE: usize = 8;
const CLASS_DEF_SIZE: usize = 32;
const TRY_ITEM_SIZE: usize = 8;

/// Nesting limit for arrays and annotations inside encoded values.
const MAX_VALUE_DEPTH: usize = 32;

/// Header offsets of the `(size, offset)` pair of each id table.
mod header_field {
    pub const STRING_IDS: usize = 0x38;
    pub const TYPE_IDS: usize = 0x40;
    pub const PROTO_IDS: usize = 0x48;
    pub const FIELD_IDS: usize = 0x50;
    pub const METHOD_IDS: usize = 0x58;
    pub const CLASS_DEFS: usize = 0x60;
}

#[derive(Debug, Clone, Copy)]
struct Section {
    size: u32,
    offset: u32,
}

/// `encoded_value` type tags.
mod value_type {
    pub const METHOD_TYPE: u8 = 0x15;
    pub const METHOD_HANDLE: u8 = 0x16;
    pub const STRING: u8 = 0x17;
    pub const TYPE: u8 = 0x18;
    pub const FIELD: u8 = 0x19;
    pub const METHOD: u8 = 0x1a;
    pub const ENUM: u8 = 0x1b;
    pub const ARRAY: u8 = 0x1c;
    pub const ANNOTATION: u8 = 0x1d;
    pub const NULL: u8 = 0x1e;
    pub const BOOLEAN: u8 = 0x1f;
    /// Byte, short, char, int, long, float and double.
    pub const NUMERIC: [u8; 7] = [0x00, 0x02, 0x03, 0x04, 0x06, 0x10, 0x11];
}

/// A class definition reduced to a name and a canonical byte form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexClass {
    /// Type descriptor, e.g. `Lcom/example/Foo;`.
    pub descriptor: String,
    /// Class access flags.
    pub access_flags: u32,
    /// Canonical encoding of the class shape and method bodies.
    pub canonical: Vec<u8>,
}

/// A parsed dex container borrowing its bytes.
#[derive(Debug, Clone)]
pub struct DexFile<'a> {
    data: &'a [u8],
    version: u16,
    strings: Section,
    types: Section,
    protos: Section,
    fields: Section,
    methods: Section,
    class_defs: Section,
}

impl<'a> DexFile<'a> {
    /// Parses the header and checks that every id table lies inside the
    /// container.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedDex`] for a bad magic, a truncated header
    /// or an id table out of range.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::malformed_dex(
                0,
                format!("{} bytes is too small for a dex header", data.len()),
            ));
        }
        let version = parse_magic(&data[..8])?;

        let section = |field: usize, item_size: usize, what: &str| -> Result<Section> {
            let size = le_u32(data, field).unwrap_or(0);
            let offset = le_u32(data, field + 4).unwrap_or(0);
            let end = u64::from(offset) + u64::from(size) * item_size as u64;
            if size > 0 && end > data.len() as u64 {
                return Err(Error::malformed_dex(
                    field,
                    format!("{what} table ({size} items at {offset:#x}) exceeds the container"),
                ));
            }
            Ok(Section { size, offset })
        };

        Ok(Self {
            data,
            version,
            strings: section(header_field::STRING_IDS, STRING_ID_SIZE, "string id")?,
            types: section(header_field::TYPE_IDS, TYPE_ID_SIZE, "type id")?,
            protos: section(header_field::PROTO_IDS, PROTO_ID_SIZE, "proto id")?,
            fields: section(header_field::FIELD_IDS, FIELD_ID_SIZE, "field id")?,
            methods: section(header_field::METHOD_IDS, METHOD_ID_SIZE, "method id")?,
            class_defs: section(header_field::CLASS_DEFS, CLASS_DEF_SIZE, "class def")?,
        })
    }

    /// Returns the format version from the magic, e.g. `35`.
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Returns the number of class definitions.
    pub fn class_count(&self) -> usize {
        self.class_defs.size as usize
    }

    /// Returns string `idx` of the string table.
    pub fn string(&self, idx: u32) -> Result<String> {
        let id = self.item(self.strings, STRING_ID_SIZE, idx, "string")?;
        let offset = self.u32_at(id, "string id")? as usize;
        let mut reader = ByteReader::at(self.data, offset);
        reader
            .uleb128()
            .ok_or_else(|| Error::malformed_dex(offset, "truncated string length"))?;
        let bytes = reader
            .c_str()
            .ok_or_else(|| Error::malformed_dex(offset, "unterminated string data"))?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Returns the descriptor of type `idx`.
    pub fn type_descriptor(&self, idx: u32) -> Result<String> {
        let id = self.item(self.types, TYPE_ID_SIZE, idx, "type")?;
        self.string(self.u32_at(id, "type id")?)
    }

    /// Returns the signature of prototype `idx` as `(params)return`.
    pub fn proto_signature(&self, idx: u32) -> Result<String> {
        let id = self.item(self.protos, PROTO_ID_SIZE, idx, "proto")?;
        let return_type = self.u32_at(id + 4, "proto id")?;
        let parameters = self.u32_at(id + 8, "proto id")?;

        let mut signature = String::from("(");
        for param in self.type_list(parameters)? {
            signature.push_str(&self.type_descriptor(u32::from(param))?);
        }
        signature.push(')');
        signature.push_str(&self.type_descriptor(return_type)?);
        Ok(signature)
    }

    /// Returns `(name, type descriptor)` of field `idx`.
    pub fn field(&self, idx: u32) -> Result<(String, String)> {
        let id = self.item(self.fields, FIELD_ID_SIZE, idx, "field")?;
        let type_idx = self.u16_at(id + 2, "field id")?;
        let name_idx = self.u32_at(id + 4, "field id")?;
        Ok((self.string(name_idx)?, self.type_descriptor(u32::from(type_idx))?))
    }

    /// Returns `(name, signature)` of method `idx`.
    pub fn method(&self, idx: u32) -> Result<(String, String)> {
        let id = self.item(self.methods, METHOD_ID_SIZE, idx, "method")?;
        let proto_idx = self.u16_at(id + 2, "method id")?;
        let name_idx = self.u32_at(id + 4, "method id")?;
        Ok((self.string(name_idx)?, self.proto_signature(u32::from(proto_idx))?))
    }

    /// Reads class definition `idx` into its canonical form.
    pub fn class(&self, idx: u32) -> Result<DexClass> {
        let def = self.item(self.class_defs, CLASS_DEF_SIZE, idx, "class def")?;
        let class_idx = self.u32_at(def, "class def")?;
        let access_flags = self.u32_at(def + 4, "class def")?;
        let superclass_idx = self.u32_at(def + 8, "class def")?;
        let interfaces_off = self.u32_at(def + 12, "class def")?;
        let class_data_off = self.u32_at(def + 24, "class def")?;
        let static_values_off = self.u32_at(def + 28, "class def")?;

        let descriptor = self.type_descriptor(class_idx)?;
        let mut out = Canonical::default();
        out.str(&descriptor);
        out.u32(access_flags);
        if superclass_idx == NO_INDEX {
            out.str("");
        } else {
            out.str(&self.type_descriptor(superclass_idx)?);
        }
        let interfaces = self.type_list(interfaces_off)?;
        out.u32(interfaces.len() as u32);
        for interface in interfaces {
            out.str(&self.type_descriptor(u32::from(interface))?);
        }

        if class_data_off == 0 {
            out.u32(0);
        } else {
            out.u32(1);
            self.class_data(class_data_off as usize, &mut out)?;
        }

        if static_values_off == 0 {
            out.u32(0);
        } else {
            out.u32(1);
            let mut reader = ByteReader::at(self.data, static_values_off as usize);
            self.encoded_array(&mut reader, &mut out, 0)?;
        }

        Ok(DexClass {
            descriptor,
            access_flags,
            canonical: out.into_bytes(),
        })
    }

    /// Reads every class definition.
    pub fn classes(&self) -> Result<Vec<DexClass>> {
        (0..self.class_defs.size).map(|idx| self.class(idx)).collect()
    }

    fn class_data(&self, offset: usize, out: &mut Canonical) -> Result<()> {
        let mut reader = ByteReader::at(self.data, offset);
        let uleb = |reader: &mut ByteReader<'_>| {
            let at = reader.position();
            reader
                .uleb128()
                .ok_or_else(|| Error::malformed_dex(at, "truncated class data"))
        };

        let static_fields = uleb(&mut reader)?;
        let instance_fields = uleb(&mut reader)?;
        let direct_methods = uleb(&mut reader)?;
        let virtual_methods = uleb(&mut reader)?;

        for count in [static_fields, instance_fields] {
            out.u32(count);
            let mut field_idx = 0u32;
            for _ in 0..count {
                let at = reader.position();
                field_idx = field_idx
                    .checked_add(uleb(&mut reader)?)
                    .ok_or_else(|| Error::malformed_dex(at, "field index overflow"))?;
                let flags = uleb(&mut reader)?;
                let (name, type_descriptor) = self.field(field_idx)?;
                out.str(&name);
                out.str(&type_descriptor);
                out.u32(flags);
            }
        }

        for count in [direct_methods, virtual_methods] {
            out.u32(count);
            let mut method_idx = 0u32;
            for _ in 0..count {
                let at = reader.position();
                method_idx = method_idx
                    .checked_add(uleb(&mut reader)?)
                    .ok_or_else(|| Error::malformed_dex(at, "method index overflow"))?;
                let flags = uleb(&mut reader)?;
                let code_off = uleb(&mut reader)?;
                let (name, signature) = self.method(method_idx)?;
                out.str(&name);
                out.str(&signature);
                out.u32(flags);
                self.code_item(code_off as usize, out)?;
            }
        }
        Ok(())
    }

    fn code_item(&self, offset: usize, out: &mut Canonical) -> Result<()> {
        if offset == 0 {
            out.u32(0);
            return Ok(());
        }
        let truncated = || Error::malformed_dex(offset, "truncated code item");
        let mut reader = ByteReader::at(self.data, offset);
        let registers = reader.u16().ok_or_else(truncated)?;
        let ins = reader.u16().ok_or_else(truncated)?;
        let outs = reader.u16().ok_or_else(truncated)?;
        let tries = reader.u16().ok_or_else(truncated)?;
        let _debug_info = reader.u32().ok_or_else(truncated)?;
        let insns_units = reader.u32().ok_or_else(truncated)?;
        let insns = usize::try_from(insns_units)
            .ok()
            .and_then(|units| units.checked_mul(2))
            .and_then(|len| reader.bytes(len))
            .ok_or_else(truncated)?;

        out.u32(1);
        out.u16(registers);
        out.u16(ins);
        out.u16(outs);
        out.u16(tries);
        out.u32(insns_units);
        out.bytes(insns);
        if tries > 0 {
            if insns_units % 2 == 1 {
                reader.bytes(2).ok_or_else(truncated)?;
            }
            let items = reader
                .bytes(usize::from(tries) * TRY_ITEM_SIZE)
                .ok_or_else(truncated)?;
            let handlers = reader.position();
            for item in items.chunks_exact(TRY_ITEM_SIZE) {
                let start_addr = u32::from_le_bytes([item[0], item[1], item[2], item[3]]);
                let insn_count = u16::from_le_bytes([item[4], item[5]]);
                let handler_off = u16::from_le_bytes([item[6], item[7]]);
                out.u32(start_addr);
                out.u16(insn_count);
                self.catch_handler(handlers + usize::from(handler_off), out)?;
            }
        }
        Ok(())
    }

    /// Folds in one `encoded_catch_handler`, with catch types resolved to
    /// descriptors.
    fn catch_handler(&self, offset: usize, out: &mut Canonical) -> Result<()> {
        let mut reader = ByteReader::at(self.data, offset);
        let truncated = |at: usize| Error::malformed_dex(at, "truncated catch handler");
        let size = reader.sleb128().ok_or_else(|| truncated(offset))?;
        out.u32(size as u32);
        for _ in 0..size.unsigned_abs() {
            let at = reader.position();
            let type_idx = reader.uleb128().ok_or_else(|| truncated(at))?;
            let addr = reader.uleb128().ok_or_else(|| truncated(at))?;
            out.str(&self.type_descriptor(type_idx)?);
            out.u32(addr);
        }
        if size <= 0 {
            let at = reader.position();
            out.u32(reader.uleb128().ok_or_else(|| truncated(at))?);
        }
        Ok(())
    }

    fn encoded_array(
        &self,
        reader: &mut ByteReader<'_>,
        out: &mut Canonical,
        depth: usize,
    ) -> Result<()> {
        let at = reader.position();
        let size = reader
            .uleb128()
            .ok_or_else(|| Error::malformed_dex(at, "truncated encoded array"))?;
        out.u32(size);
        for _ in 0..size {
            self.encoded_value(reader, out, depth)?;
        }
        Ok(())
    }

    /// Folds in one `encoded_value`. Pool indices are resolved so that a
    /// shifted string or type table leaves the encoding unchanged.
    fn encoded_value(
        &self,
        reader: &mut ByteReader<'_>,
        out: &mut Canonical,
        depth: usize,
    ) -> Result<()> {
        let at = reader.position();
        if depth >= MAX_VALUE_DEPTH {
            return Err(Error::malformed_dex(at, "encoded values nested too deeply"));
        }
        let truncated = || Error::malformed_dex(at, "truncated encoded value");
        let header = reader.bytes(1).ok_or_else(truncated)?[0];
        let (kind, arg) = (header & 0x1f, usize::from(header >> 5));
        out.bytes(&[header]);

        match kind {
            value_type::NULL | value_type::BOOLEAN => {}
            value_type::ARRAY => self.encoded_array(reader, out, depth + 1)?,
            value_type::ANNOTATION => {
                let type_idx = reader.uleb128().ok_or_else(truncated)?;
                let size = reader.uleb128().ok_or_else(truncated)?;
                out.str(&self.type_descriptor(type_idx)?);
                out.u32(size);
                for _ in 0..size {
                    let name_idx = reader.uleb128().ok_or_else(truncated)?;
                    out.str(&self.string(name_idx)?);
                    self.encoded_value(reader, out, depth + 1)?;
                }
            }
            value_type::STRING
            | value_type::TYPE
            | value_type::FIELD
            | value_type::ENUM
            | value_type::METHOD => {
                let raw = reader.bytes(arg + 1).ok_or_else(truncated)?;
                if raw.len() > 4 {
                    return Err(Error::malformed_dex(at, "index value wider than 4 bytes"));
                }
                let idx = raw
                    .iter()
                    .rev()
                    .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
                match kind {
                    value_type::STRING => out.str(&self.string(idx)?),
                    value_type::TYPE => out.str(&self.type_descriptor(idx)?),
                    value_type::METHOD => {
                        let (name, signature) = self.method(idx)?;
                        out.str(&name);
                        out.str(&signature);
                    }
                    _ => {
                        let (name, type_descriptor) = self.field(idx)?;
                        out.str(&name);
                        out.str(&type_descriptor);
                    }
                }
            }
            value_type::METHOD_TYPE | value_type::METHOD_HANDLE => {
                out.bytes(reader.bytes(arg + 1).ok_or_else(truncated)?);
            }
            kind if value_type::NUMERIC.contains(&kind) => {
                out.bytes(reader.bytes(arg + 1).ok_or_else(truncated)?);
            }
            kind => {
                return Err(Error::malformed_dex(
                    at,
                    format!("unknown encoded value type {kind:#04x}"),
                ));
            }
        }
        Ok(())
    }

    /// Reads a `type_list` (u32 size, u16 type indices). Offset 0 is empty.
    fn type_list(&self, offset: u32) -> Result<Vec<u16>> {
        if offset == 0 {
            return Ok(Vec::new());
        }
        let offset = offset as usize;
        let size = self.u32_at(offset, "type list")? as usize;
        let body = offset + 4;
        let end = size
            .checked_mul(2)
            .and_then(|len| body.checked_add(len))
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::malformed_dex(offset, "type list exceeds the container"))?;
        Ok(self.data[body..end]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    fn item(&self, section: Section, item_size: usize, idx: u32, what: &str) -> Result<usize> {
        if idx >= section.size {
            return Err(Error::malformed_dex(
                section.offset as usize,
                format!("{what} index {idx} out of range ({} items)", section.size),
            ));
        }
        Ok(section.offset as usize + idx as usize * item_size)
    }

    fn u32_at(&self, offset: usize, what: &str) -> Result<u32> {
        le_u32(self.data, offset)
            .ok_or_else(|| Error::malformed_dex(offset, format!("truncated {what}")))
    }

    fn u16_at(&self, offset: usize, what: &str) -> Result<u16> {
        le_u16(self.data, offset)
            .ok_or_else(|| Error::malformed_dex(offset, format!("truncated {what}")))
    }
}

/// Checks `dex\nNNN\0` and returns the version number.
fn parse_magic(magic: &[u8]) -> Result<u16> {
    let version = magic
        .strip_prefix(MAGIC_PREFIX)
        .and_then(|rest| rest.strip_suffix(b"\0"))
        .filter(|digits| digits.len() == 3 && digits.iter().all(u8::is_ascii_digit))
        .map(|digits| {
            digits
                .iter()
                .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'))
        });
    version.ok_or_else(|| Error::malformed_dex(0, "bad dex magic"))
}

/// Accumulates the canonical encoding of a class.
#[derive(Default)]
struct Canonical {
    buf: Vec<u8>,
}

impl Canonical {
    fn str(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
