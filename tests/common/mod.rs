//! Shared test utilities for integration tests.
//!
//! Archives and dex containers are built in memory so that every test
//! controls the exact byte layout it exercises.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::io::Write;

use apkdelta::Archive;
use apkdelta::checksum::{Checksum, Crc32};

const LOCAL_SIGNATURE: u32 = 0x0403_4b50;
const CD_SIGNATURE: u32 = 0x0201_4b50;
const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const SIGNING_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";

struct FileSpec {
    name: String,
    data: Vec<u8>,
    deflate: bool,
    local_extra: Vec<u8>,
    cd_extra: Vec<u8>,
}

/// Builds ZIP archives byte by byte.
///
/// # Example
///
/// ```ignore
/// let bytes = ZipBuilder::new()
///     .stored("AndroidManifest.xml", b"<manifest/>")
///     .deflated("classes.dex", &dex)
///     .signing_block(b"v2 signature")
///     .build();
/// ```
#[derive(Default)]
pub struct ZipBuilder {
    files: Vec<FileSpec>,
    aliases: Vec<(String, String)>,
    signing_block: Option<Vec<u8>>,
    comment: Vec<u8>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an uncompressed entry.
    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.file(name, data, false, &[])
    }

    /// Adds a raw-deflate compressed entry.
    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.file(name, data, true, &[])
    }

    /// Adds an uncompressed entry whose local header carries `padding`
    /// bytes of extra field, as alignment tools produce.
    pub fn aligned(self, name: &str, data: &[u8], padding: usize) -> Self {
        self.file(name, data, false, &vec![0u8; padding])
    }

    /// Adds an uncompressed entry whose local header and directory record
    /// both carry `padding` bytes of extra field.
    pub fn padded(mut self, name: &str, data: &[u8], padding: usize) -> Self {
        self = self.file(name, data, false, &vec![0u8; padding]);
        if let Some(file) = self.files.last_mut() {
            file.cd_extra = vec![0u8; padding];
        }
        self
    }

    fn file(mut self, name: &str, data: &[u8], deflate: bool, local_extra: &[u8]) -> Self {
        self.files.push(FileSpec {
            name: name.to_string(),
            data: data.to_vec(),
            deflate,
            local_extra: local_extra.to_vec(),
            cd_extra: Vec::new(),
        });
        self
    }

    /// Adds a second central directory record named `alias` pointing at the
    /// local header of `target`.
    pub fn alias(mut self, alias: &str, target: &str) -> Self {
        self.aliases.push((alias.to_string(), target.to_string()));
        self
    }

    /// Inserts an APK signing block carrying `payload` before the central
    /// directory.
    pub fn signing_block(mut self, payload: &[u8]) -> Self {
        self.signing_block = Some(payload.to_vec());
        self
    }

    /// Sets the EOCD comment.
    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.build_layout().bytes
    }

    pub fn build_layout(&self) -> BuiltZip {
        let mut out = Vec::new();
        let mut records = Vec::new();

        for file in &self.files {
            let crc = Crc32::compute(&file.data);
            let (method, payload) = if file.deflate {
                (8u16, deflate(&file.data))
            } else {
                (0u16, file.data.clone())
            };
            let offset = out.len() as u32;

            out.extend_from_slice(&LOCAL_SIGNATURE.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&method.to_le_bytes());
            out.extend_from_slice(&[0u8; 4]);
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(&(file.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(file.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&(file.local_extra.len() as u16).to_le_bytes());
            out.extend_from_slice(file.name.as_bytes());
            out.extend_from_slice(&file.local_extra);
            out.extend_from_slice(&payload);

            records.push(Record {
                name: file.name.clone(),
                method,
                crc,
                compressed: payload.len() as u32,
                uncompressed: file.data.len() as u32,
                offset,
                extra: file.cd_extra.clone(),
            });
        }

        for (alias, target) in &self.aliases {
            let mut record = records
                .iter()
                .find(|r| &r.name == target)
                .cloned()
                .expect("alias target must exist");
            record.name = alias.clone();
            records.push(record);
        }

        let signature = self.signing_block.as_ref().map(|payload| {
            let start = out.len();
            let size = (payload.len() + 8 + 16) as u64;
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(payload);
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(SIGNING_BLOCK_MAGIC);
            start..out.len()
        });

        let cd_start = out.len();
        for record in &records {
            record.write(&mut out);
        }
        let cd = cd_start..out.len();

        out.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&(records.len() as u16).to_le_bytes());
        out.extend_from_slice(&(records.len() as u16).to_le_bytes());
        out.extend_from_slice(&(cd.len() as u32).to_le_bytes());
        out.extend_from_slice(&(cd.start as u32).to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);

        BuiltZip {
            bytes: out,
            cd,
            signature,
        }
    }
}

#[derive(Clone)]
struct Record {
    name: String,
    method: u16,
    crc: u32,
    compressed: u32,
    uncompressed: u32,
    offset: u32,
    extra: Vec<u8>,
}

impl Record {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&CD_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.method.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&self.crc.to_le_bytes());
        out.extend_from_slice(&self.compressed.to_le_bytes());
        out.extend_from_slice(&self.uncompressed.to_le_bytes());
        out.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.extra.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(&self.extra);
    }
}

/// A built archive and the location of its regions.
pub struct BuiltZip {
    pub bytes: Vec<u8>,
    pub cd: std::ops::Range<usize>,
    pub signature: Option<std::ops::Range<usize>>,
}

impl BuiltZip {
    /// The archive as a device would report it.
    pub fn remote(&self, name: &str) -> Archive {
        let cd = self.bytes[self.cd.clone()].to_vec();
        let signature = self.signature.clone().map(|r| self.bytes[r].to_vec());
        Archive::from_remote_dump(name, cd, signature).unwrap()
    }

    /// The archive as built locally.
    pub fn local(&self, name: &str) -> Archive {
        Archive::from_bytes(name, self.bytes.clone()).unwrap()
    }
}

/// Raw-deflates `data`.
pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Builds a remote view of a locally indexed archive.
pub fn remote_of(local: &Archive) -> Archive {
    let bytes = local.bytes().unwrap();
    let cd = local.map().central_directory.unwrap().slice(bytes).unwrap().to_vec();
    let signature = local
        .map()
        .signature
        .map(|span| span.slice(bytes).unwrap().to_vec());
    Archive::from_remote_dump(local.name(), cd, signature).unwrap()
}

/// One method of a test class. Every method has the prototype `()V`.
#[derive(Clone)]
pub struct MethodSpec {
    pub name: String,
    pub insns: Vec<u16>,
    /// Exception type of a handler covering the whole body, at address 0.
    pub catch: Option<String>,
}

/// One class of a test dex container.
#[derive(Clone)]
pub struct ClassSpec {
    pub descriptor: String,
    pub superclass: Option<String>,
    pub methods: Vec<MethodSpec>,
    /// Static `int` fields with their initial values.
    pub static_ints: Vec<(String, i32)>,
}

impl ClassSpec {
    /// A class extending `Ljava/lang/Object;` with one method `run`
    /// whose body is `insns`.
    pub fn new(descriptor: &str, insns: &[u16]) -> Self {
        Self {
            descriptor: descriptor.to_string(),
            superclass: Some("Ljava/lang/Object;".to_string()),
            methods: vec![MethodSpec {
                name: "run".to_string(),
                insns: insns.to_vec(),
                catch: None,
            }],
            static_ints: Vec::new(),
        }
    }

    /// Adds a method.
    pub fn method(mut self, name: &str, insns: &[u16]) -> Self {
        self.methods.push(MethodSpec {
            name: name.to_string(),
            insns: insns.to_vec(),
            catch: None,
        });
        self
    }

    /// Wraps the body of the last method in a handler for `exception`.
    pub fn catching(mut self, exception: &str) -> Self {
        if let Some(method) = self.methods.last_mut() {
            method.catch = Some(exception.to_string());
        }
        self
    }

    /// Adds a static `int` field initialized to `value`.
    pub fn static_int(mut self, name: &str, value: i32) -> Self {
        self.static_ints.push((name.to_string(), value));
        self
    }
}

/// `return-void`
pub const RETURN_VOID: &[u16] = &[0x000e];
/// `const/4 v0, #1; return-void`
pub const CONST_RETURN: &[u16] = &[0x1012, 0x000e];

fn uleb(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// Builds a dex container holding `classes`.
pub fn build_dex(classes: &[ClassSpec]) -> Vec<u8> {
    let mut strings: Vec<String> = vec!["V".to_string()];
    let mut types: Vec<String> = vec!["V".to_string()];
    for class in classes {
        strings.push(class.descriptor.clone());
        types.push(class.descriptor.clone());
        if let Some(superclass) = &class.superclass {
            strings.push(superclass.clone());
            types.push(superclass.clone());
        }
        for method in &class.methods {
            strings.push(method.name.clone());
            if let Some(exception) = &method.catch {
                strings.push(exception.clone());
                types.push(exception.clone());
            }
        }
        for (name, _) in &class.static_ints {
            strings.push(name.clone());
            strings.push("I".to_string());
            types.push("I".to_string());
        }
    }
    strings.sort();
    strings.dedup();
    types.sort();
    types.dedup();
    let string_idx = |s: &str| strings.iter().position(|x| x == s).unwrap() as u32;
    let type_idx = |s: &str| types.iter().position(|x| x == s).unwrap() as u32;

    let method_count: usize = classes.iter().map(|c| c.methods.len()).sum();
    let field_count: usize = classes.iter().map(|c| c.static_ints.len()).sum();
    let string_ids_off = 0x70;
    let type_ids_off = string_ids_off + strings.len() * 4;
    let proto_ids_off = type_ids_off + types.len() * 4;
    let method_ids_off = proto_ids_off + 12;
    let field_ids_off = method_ids_off + method_count * 8;
    let class_defs_off = field_ids_off + field_count * 8;
    let data_off = class_defs_off + classes.len() * 32;

    let mut out = vec![0u8; data_off];
    out[..8].copy_from_slice(b"dex\n035\0");
    put_u32(&mut out, 0x24, 0x70);
    put_u32(&mut out, 0x28, 0x1234_5678);
    put_u32(&mut out, 0x38, strings.len() as u32);
    put_u32(&mut out, 0x3C, string_ids_off as u32);
    put_u32(&mut out, 0x40, types.len() as u32);
    put_u32(&mut out, 0x44, type_ids_off as u32);
    put_u32(&mut out, 0x48, 1);
    put_u32(&mut out, 0x4C, proto_ids_off as u32);
    put_u32(&mut out, 0x50, field_count as u32);
    put_u32(&mut out, 0x54, field_ids_off as u32);
    put_u32(&mut out, 0x58, method_count as u32);
    put_u32(&mut out, 0x5C, method_ids_off as u32);
    put_u32(&mut out, 0x60, classes.len() as u32);
    put_u32(&mut out, 0x64, class_defs_off as u32);

    for (i, s) in strings.iter().enumerate() {
        let at = out.len() as u32;
        put_u32(&mut out, string_ids_off + i * 4, at);
        uleb(&mut out, s.encode_utf16().count() as u32);
        out.extend_from_slice(s.as_bytes());
        out.push(0);
    }
    for (i, t) in types.iter().enumerate() {
        put_u32(&mut out, type_ids_off + i * 4, string_idx(t));
    }
    put_u32(&mut out, proto_ids_off, string_idx("V"));
    put_u32(&mut out, proto_ids_off + 4, type_idx("V"));

    let mut method_idx = 0usize;
    for class in classes {
        for method in &class.methods {
            let at = method_ids_off + method_idx * 8;
            out[at..at + 2].copy_from_slice(&(type_idx(&class.descriptor) as u16).to_le_bytes());
            out[at + 2..at + 4].copy_from_slice(&0u16.to_le_bytes());
            put_u32(&mut out, at + 4, string_idx(&method.name));
            method_idx += 1;
        }
    }

    let mut field_idx = 0usize;
    for class in classes {
        for (name, _) in &class.static_ints {
            let at = field_ids_off + field_idx * 8;
            out[at..at + 2].copy_from_slice(&(type_idx(&class.descriptor) as u16).to_le_bytes());
            out[at + 2..at + 4].copy_from_slice(&(type_idx("I") as u16).to_le_bytes());
            put_u32(&mut out, at + 4, string_idx(name));
            field_idx += 1;
        }
    }

    let mut code_offsets = Vec::new();
    for class in classes {
        let mut offsets = Vec::new();
        for method in &class.methods {
            while out.len() % 4 != 0 {
                out.push(0);
            }
            offsets.push(out.len() as u32);
            let tries = u16::from(method.catch.is_some());
            out.extend_from_slice(&1u16.to_le_bytes());
            out.extend_from_slice(&1u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&tries.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&(method.insns.len() as u32).to_le_bytes());
            for unit in &method.insns {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            if let Some(exception) = &method.catch {
                if method.insns.len() % 2 == 1 {
                    out.extend_from_slice(&0u16.to_le_bytes());
                }
                // One try item pointing at the handler after the list size.
                out.extend_from_slice(&0u32.to_le_bytes());
                out.extend_from_slice(&(method.insns.len() as u16).to_le_bytes());
                out.extend_from_slice(&1u16.to_le_bytes());
                uleb(&mut out, 1);
                out.push(0x01);
                uleb(&mut out, type_idx(exception));
                uleb(&mut out, 0);
            }
        }
        code_offsets.push(offsets);
    }

    let mut method_idx = 0u32;
    let mut field_idx = 0usize;
    for (i, class) in classes.iter().enumerate() {
        let class_data_off = out.len() as u32;
        uleb(&mut out, class.static_ints.len() as u32);
        uleb(&mut out, 0);
        uleb(&mut out, class.methods.len() as u32);
        uleb(&mut out, 0);
        for (j, _) in class.static_ints.iter().enumerate() {
            uleb(&mut out, if j == 0 { field_idx as u32 } else { 1 });
            uleb(&mut out, 0x0009);
            field_idx += 1;
        }
        for (j, _) in class.methods.iter().enumerate() {
            uleb(&mut out, if j == 0 { method_idx } else { 1 });
            uleb(&mut out, 0x0001);
            uleb(&mut out, code_offsets[i][j]);
            method_idx += 1;
        }
        // `method_idx` advanced past this class; the first diff of the next
        // class is absolute.

        let def = class_defs_off + i * 32;
        put_u32(&mut out, def, type_idx(&class.descriptor));
        put_u32(&mut out, def + 4, 0x0001);
        let superclass = class
            .superclass
            .as_deref()
            .map(type_idx)
            .unwrap_or(0xffff_ffff);
        put_u32(&mut out, def + 8, superclass);
        put_u32(&mut out, def + 16, 0xffff_ffff);
        put_u32(&mut out, def + 24, class_data_off);

        if !class.static_ints.is_empty() {
            let static_values_off = out.len() as u32;
            uleb(&mut out, class.static_ints.len() as u32);
            for (_, value) in &class.static_ints {
                // VALUE_INT with four payload bytes.
                out.push((3 << 5) | 0x04);
                out.extend_from_slice(&value.to_le_bytes());
            }
            put_u32(&mut out, def + 28, static_values_off);
        }
    }

    let size = out.len() as u32;
    put_u32(&mut out, 0x20, size);
    put_u32(&mut out, 0x68, size - data_off as u32);
    put_u32(&mut out, 0x6C, data_off as u32);
    out
}
