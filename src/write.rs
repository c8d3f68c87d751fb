use std::io::Result;

use byteorder::{BigEndian, WriteBytesExt};

use crate::ir::{Attribute, ClassFile, Code, Constant, ConstantPool, ExceptionHandler, Member};

const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

/// Serialization into the class file binary format.
///
/// Tags are always `u8` and sequence lengths are usually `u16`, which is the
/// default encoding for `Vec`. Byte arrays with `u32` lengths (attribute
/// payloads, code arrays) are written explicitly.
pub(crate) trait Serialize {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Serialize for u16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(*self)
    }
}

impl Serialize for u32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(*self)
    }
}

/// Size in `u16` is the first thing serialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.len() as u16).serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

fn write_u32_prefixed<W: WriteBytesExt>(bytes: &[u8], writer: &mut W) -> Result<()> {
    (bytes.len() as u32).serialize(writer)?;
    writer.write_all(bytes)
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.name_index.serialize(writer)?;
        write_u32_prefixed(&self.info, writer)
    }
}

impl Serialize for Member {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)
    }
}

impl Serialize for ExceptionHandler {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.start_pc.serialize(writer)?;
        self.end_pc.serialize(writer)?;
        self.handler_pc.serialize(writer)?;
        self.catch_type.serialize(writer)
    }
}

impl Serialize for Code {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.max_stack.serialize(writer)?;
        self.max_locals.serialize(writer)?;
        write_u32_prefixed(&self.code, writer)?;
        self.exception_table.serialize(writer)?;
        self.attributes.serialize(writer)
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        match self {
            Constant::Unusable => Ok(()),
            Constant::Utf8(bytes) => {
                1u8.serialize(writer)?;
                (bytes.len() as u16).serialize(writer)?;
                writer.write_all(bytes)
            }
            Constant::Integer(value) => {
                3u8.serialize(writer)?;
                writer.write_i32::<BigEndian>(*value)
            }
            Constant::Float(bits) => {
                4u8.serialize(writer)?;
                bits.serialize(writer)
            }
            Constant::Long(value) => {
                5u8.serialize(writer)?;
                writer.write_i64::<BigEndian>(*value)
            }
            Constant::Double(bits) => {
                6u8.serialize(writer)?;
                writer.write_u64::<BigEndian>(*bits)
            }
            Constant::Class { name_index } => {
                7u8.serialize(writer)?;
                name_index.serialize(writer)
            }
            Constant::String { string_index } => {
                8u8.serialize(writer)?;
                string_index.serialize(writer)
            }
            Constant::FieldRef {
                class_index,
                name_and_type_index,
            } => {
                9u8.serialize(writer)?;
                class_index.serialize(writer)?;
                name_and_type_index.serialize(writer)
            }
            Constant::MethodRef {
                class_index,
                name_and_type_index,
            } => {
                10u8.serialize(writer)?;
                class_index.serialize(writer)?;
                name_and_type_index.serialize(writer)
            }
            Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => {
                11u8.serialize(writer)?;
                class_index.serialize(writer)?;
                name_and_type_index.serialize(writer)
            }
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => {
                12u8.serialize(writer)?;
                name_index.serialize(writer)?;
                descriptor_index.serialize(writer)
            }
            Constant::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                15u8.serialize(writer)?;
                reference_kind.serialize(writer)?;
                reference_index.serialize(writer)
            }
            Constant::MethodType { descriptor_index } => {
                16u8.serialize(writer)?;
                descriptor_index.serialize(writer)
            }
            Constant::Dynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method_attr_index.serialize(writer)?;
                name_and_type_index.serialize(writer)
            }
            Constant::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method_attr_index.serialize(writer)?;
                name_and_type_index.serialize(writer)
            }
            Constant::Module { name_index } => {
                19u8.serialize(writer)?;
                name_index.serialize(writer)
            }
            Constant::Package { name_index } => {
                20u8.serialize(writer)?;
                name_index.serialize(writer)
            }
        }
    }
}

impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.count() as u16).serialize(writer)?;
        for constant in self.entries() {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&MAGIC)?;
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)?;
        self.constant_pool.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class.serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)
    }
}

pub(crate) fn to_bytes<S: Serialize>(value: &S) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    value.serialize(&mut bytes)?;
    Ok(bytes)
}

pub(crate) fn class_to_bytes(class: &ClassFile) -> Result<Vec<u8>> {
    to_bytes(class)
}
