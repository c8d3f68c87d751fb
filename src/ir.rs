use std::borrow::Cow;

use crate::error::{DesugarError, Result};

/// Attribute names the pass looks up by text.
pub(crate) const CODE: &str = "Code";

/// In-memory representation of one class file, close enough to the binary
/// layout that re-emitting an untouched record reproduces the input bytes.
#[derive(Clone, Debug)]
pub(crate) struct ClassFile {
    pub(crate) minor_version: u16,
    pub(crate) major_version: u16,
    pub(crate) constant_pool: ConstantPool,
    pub(crate) access_flags: u16,
    pub(crate) this_class: u16,
    pub(crate) super_class: u16,
    pub(crate) interfaces: Vec<u16>,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
    pub(crate) attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Internal name of the class, e.g. `com/example/App$Inner`.
    pub(crate) fn name(&self) -> Result<Cow<'_, str>> {
        self.constant_pool.class_name(self.this_class)
    }
}

/// Field or method declaration; both share the same binary layout.
#[derive(Clone, Debug)]
pub(crate) struct Member {
    pub(crate) access_flags: u16,
    pub(crate) name_index: u16,
    pub(crate) descriptor_index: u16,
    pub(crate) attributes: Vec<Attribute>,
}

pub(crate) type Field = Member;
pub(crate) type Method = Member;

impl Member {
    pub(crate) fn name<'p>(&self, pool: &'p ConstantPool) -> Result<Cow<'p, str>> {
        pool.utf8(self.name_index)
    }

    pub(crate) fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Result<Cow<'p, str>> {
        pool.utf8(self.descriptor_index)
    }

    /// Position of the `Code` attribute, if the method has a body.
    pub(crate) fn code_position(&self, pool: &ConstantPool) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attribute| attribute.is_named(pool, CODE))
    }
}

/// Raw attribute; payloads are only decoded by the stage that needs them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Attribute {
    pub(crate) name_index: u16,
    pub(crate) info: Vec<u8>,
}

impl Attribute {
    pub(crate) fn is_named(&self, pool: &ConstantPool, name: &str) -> bool {
        pool.is_utf8(self.name_index, name)
    }
}

/// Decoded `Code` attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Code {
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    pub(crate) code: Vec<u8>,
    pub(crate) exception_table: Vec<ExceptionHandler>,
    pub(crate) attributes: Vec<Attribute>,
}

/// Exception handler entry from the Code attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ExceptionHandler {
    pub(crate) start_pc: u16,
    pub(crate) end_pc: u16,
    pub(crate) handler_pc: u16,
    pub(crate) catch_type: u16,
}

/// Constant pool entry.
///
/// Numeric constants keep their raw bits so NaN payloads survive re-emission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Constant {
    /// Slot 0 and the slot following a `Long` or `Double`.
    Unusable,
    Utf8(Vec<u8>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name_index: u16 },
    String { string_index: u16 },
    FieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    MethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType { descriptor_index: u16 },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

impl Constant {
    /// Number of pool slots the constant occupies.
    pub(crate) fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Constant pool indexed the way the class file indexes it (slot 0 unused).
#[derive(Clone, Debug, Default)]
pub(crate) struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    /// Wraps entries that already include the unusable slot 0.
    pub(crate) fn new(entries: Vec<Constant>) -> Self {
        Self { entries }
    }

    pub(crate) fn entries(&self) -> &[Constant] {
        &self.entries
    }

    /// Value written as `constant_pool_count`.
    pub(crate) fn count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get(&self, index: u16) -> Option<&Constant> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => None,
            Some(constant) => Some(constant),
        }
    }

    /// Text of a `Utf8` entry.
    ///
    /// Class files use modified UTF-8; the only sequences that differ from
    /// standard UTF-8 (encoded NUL and surrogate pairs) never occur in the
    /// names this pass compares, so they decode lossily here.
    pub(crate) fn utf8(&self, index: u16) -> Result<Cow<'_, str>> {
        match self.get(index) {
            Some(Constant::Utf8(bytes)) => Ok(String::from_utf8_lossy(bytes)),
            _ => Err(DesugarError::BadConstant {
                index,
                expected: "Utf8",
            }),
        }
    }

    pub(crate) fn is_utf8(&self, index: u16, text: &str) -> bool {
        match self.get(index) {
            Some(Constant::Utf8(bytes)) => bytes.as_slice() == text.as_bytes(),
            _ => false,
        }
    }

    pub(crate) fn class_name(&self, index: u16) -> Result<Cow<'_, str>> {
        match self.get(index) {
            Some(Constant::Class { name_index }) => self.utf8(*name_index),
            _ => Err(DesugarError::BadConstant {
                index,
                expected: "Class",
            }),
        }
    }

    /// Resolves a `Methodref` or `InterfaceMethodref` to owner, name and descriptor.
    pub(crate) fn method_ref(&self, index: u16) -> Result<MethodRef> {
        let (class_index, name_and_type_index, is_interface) = match self.get(index) {
            Some(Constant::MethodRef {
                class_index,
                name_and_type_index,
            }) => (*class_index, *name_and_type_index, false),
            Some(Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            }) => (*class_index, *name_and_type_index, true),
            _ => {
                return Err(DesugarError::BadConstant {
                    index,
                    expected: "Methodref",
                });
            }
        };
        let (name_index, descriptor_index) = match self.get(name_and_type_index) {
            Some(Constant::NameAndType {
                name_index,
                descriptor_index,
            }) => (*name_index, *descriptor_index),
            _ => {
                return Err(DesugarError::BadConstant {
                    index: name_and_type_index,
                    expected: "NameAndType",
                });
            }
        };
        Ok(MethodRef {
            owner: self.class_name(class_index)?.into_owned(),
            name: self.utf8(name_index)?.into_owned(),
            descriptor: self.utf8(descriptor_index)?.into_owned(),
            is_interface,
        })
    }
}

/// Resolved method reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MethodRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) is_interface: bool,
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CallSite {
    pub(crate) method: MethodRef,
    pub(crate) kind: CallKind,
    pub(crate) offset: usize,
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}
