use byteorder::{BigEndian, ByteOrder};

use crate::error::{DesugarError, Result};
use crate::ir::{Attribute, ClassFile, Code, Constant, ConstantPool, ExceptionHandler, Member};

const MAGIC: u32 = 0xCAFE_BABE;

/// Big-endian cursor over a borrowed byte slice.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(DesugarError::Truncated {
                offset: self.position,
                wanted: len - self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    /// Reads a `u16`-prefixed sequence.
    pub(crate) fn read_vec<T>(
        &mut self,
        mut read_one: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let count = self.read_u16()?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(read_one(self)?);
        }
        Ok(items)
    }

    /// Fails unless every byte has been consumed.
    pub(crate) fn finish(self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            left => Err(DesugarError::TrailingBytes(left)),
        }
    }
}

/// Parse a complete class file.
pub(crate) fn parse_class(data: &[u8]) -> Result<ClassFile> {
    let mut reader = Reader::new(data);

    let magic = reader.read_u32()?;
    if magic != MAGIC {
        return Err(DesugarError::BadMagic(magic));
    }
    let minor_version = reader.read_u16()?;
    let major_version = reader.read_u16()?;
    let constant_pool = read_constant_pool(&mut reader)?;
    let access_flags = reader.read_u16()?;
    let this_class = reader.read_u16()?;
    let super_class = reader.read_u16()?;
    let interfaces = reader.read_vec(Reader::read_u16)?;
    let fields = reader.read_vec(read_member)?;
    let methods = reader.read_vec(read_member)?;
    let attributes = reader.read_vec(read_attribute)?;
    reader.finish()?;

    let class = ClassFile {
        minor_version,
        major_version,
        constant_pool,
        access_flags,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        attributes,
    };
    // Surface a dangling this_class now rather than halfway through the pass.
    class.name()?;
    Ok(class)
}

/// Parse the payload of a `Code` attribute.
pub(crate) fn parse_code(info: &[u8]) -> Result<Code> {
    let mut reader = Reader::new(info);
    let max_stack = reader.read_u16()?;
    let max_locals = reader.read_u16()?;
    let code_length = reader.read_u32()? as usize;
    let code = reader.take(code_length)?.to_vec();
    let exception_table = reader.read_vec(|r| {
        Ok(ExceptionHandler {
            start_pc: r.read_u16()?,
            end_pc: r.read_u16()?,
            handler_pc: r.read_u16()?,
            catch_type: r.read_u16()?,
        })
    })?;
    let attributes = reader.read_vec(read_attribute)?;
    reader.finish()?;

    Ok(Code {
        max_stack,
        max_locals,
        code,
        exception_table,
        attributes,
    })
}

fn read_constant_pool(reader: &mut Reader<'_>) -> Result<ConstantPool> {
    let count = reader.read_u16()? as usize;
    let mut entries = Vec::with_capacity(count);
    entries.push(Constant::Unusable);
    while entries.len() < count {
        let index = entries.len();
        let constant = read_constant(reader, index)?;
        let width = constant.width();
        entries.push(constant);
        if width == 2 {
            entries.push(Constant::Unusable);
        }
    }
    // A trailing Long/Double may claim one slot past the declared count.
    entries.truncate(count.max(1));
    Ok(ConstantPool::new(entries))
}

fn read_constant(reader: &mut Reader<'_>, index: usize) -> Result<Constant> {
    let tag = reader.read_u8()?;
    let constant = match tag {
        1 => {
            let len = reader.read_u16()? as usize;
            Constant::Utf8(reader.take(len)?.to_vec())
        }
        3 => Constant::Integer(reader.read_u32()? as i32),
        4 => Constant::Float(reader.read_u32()?),
        5 => Constant::Long(reader.read_u64()? as i64),
        6 => Constant::Double(reader.read_u64()?),
        7 => Constant::Class {
            name_index: reader.read_u16()?,
        },
        8 => Constant::String {
            string_index: reader.read_u16()?,
        },
        9 => Constant::FieldRef {
            class_index: reader.read_u16()?,
            name_and_type_index: reader.read_u16()?,
        },
        10 => Constant::MethodRef {
            class_index: reader.read_u16()?,
            name_and_type_index: reader.read_u16()?,
        },
        11 => Constant::InterfaceMethodRef {
            class_index: reader.read_u16()?,
            name_and_type_index: reader.read_u16()?,
        },
        12 => Constant::NameAndType {
            name_index: reader.read_u16()?,
            descriptor_index: reader.read_u16()?,
        },
        15 => Constant::MethodHandle {
            reference_kind: reader.read_u8()?,
            reference_index: reader.read_u16()?,
        },
        16 => Constant::MethodType {
            descriptor_index: reader.read_u16()?,
        },
        17 => Constant::Dynamic {
            bootstrap_method_attr_index: reader.read_u16()?,
            name_and_type_index: reader.read_u16()?,
        },
        18 => Constant::InvokeDynamic {
            bootstrap_method_attr_index: reader.read_u16()?,
            name_and_type_index: reader.read_u16()?,
        },
        19 => Constant::Module {
            name_index: reader.read_u16()?,
        },
        20 => Constant::Package {
            name_index: reader.read_u16()?,
        },
        _ => return Err(DesugarError::UnknownConstantTag { tag, index }),
    };
    Ok(constant)
}

fn read_member(reader: &mut Reader<'_>) -> Result<Member> {
    Ok(Member {
        access_flags: reader.read_u16()?,
        name_index: reader.read_u16()?,
        descriptor_index: reader.read_u16()?,
        attributes: reader.read_vec(read_attribute)?,
    })
}

fn read_attribute(reader: &mut Reader<'_>) -> Result<Attribute> {
    let name_index = reader.read_u16()?;
    let len = reader.read_u32()? as usize;
    Ok(Attribute {
        name_index,
        info: reader.take(len)?.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ClassBuilder;
    use crate::write::class_to_bytes;

    #[test]
    fn parse_rejects_wrong_magic() {
        let error = parse_class(b"nope-nope-nope").expect_err("bad magic");

        assert!(matches!(error, DesugarError::BadMagic(_)));
    }

    #[test]
    fn parse_rejects_truncated_class() {
        let bytes = ClassBuilder::new("com/example/App").to_bytes();

        let error = parse_class(&bytes[..bytes.len() - 3]).expect_err("truncated");

        assert!(matches!(error, DesugarError::Truncated { .. }));
    }

    #[test]
    fn parse_rejects_trailing_bytes() {
        let mut bytes = ClassBuilder::new("com/example/App").to_bytes();
        bytes.extend_from_slice(&[0, 0]);

        let error = parse_class(&bytes).expect_err("trailing");

        assert!(matches!(error, DesugarError::TrailingBytes(2)));
    }

    #[test]
    fn untouched_class_is_reemitted_identically() {
        let mut builder = ClassBuilder::new("com/example/App");
        builder.long_constant(1 << 40);
        builder.nest_host("com/example/Outer");
        builder.method("run", "()V", 1, 1, vec![0x2a, 0x57, 0xb1]);
        let bytes = builder.to_bytes();

        let class = parse_class(&bytes).expect("parse class");

        assert_eq!(class.name().expect("class name"), "com/example/App");
        assert_eq!(class.methods.len(), 1);
        assert_eq!(class_to_bytes(&class).expect("write class"), bytes);
    }

    #[test]
    fn code_attribute_is_decoded() {
        let mut builder = ClassBuilder::new("com/example/App");
        builder.method("run", "()V", 2, 1, vec![0x03, 0x57, 0xb1]);
        let class = builder.build();
        let method = &class.methods[0];
        let position = method
            .code_position(&class.constant_pool)
            .expect("code attribute");

        let code = parse_code(&method.attributes[position].info).expect("parse code");

        assert_eq!(code.max_stack, 2);
        assert_eq!(code.max_locals, 1);
        assert_eq!(code.code, vec![0x03, 0x57, 0xb1]);
        assert!(code.exception_table.is_empty());
    }
}
