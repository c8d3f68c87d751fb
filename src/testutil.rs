//! Builders for synthetic class files used by unit tests.

use byteorder::{BigEndian, WriteBytesExt};

use crate::bytecode::decode;
use crate::ir::{Attribute, ClassFile, Code, Constant, ConstantPool, Method};
use crate::opcodes::INVOKEVIRTUAL;
use crate::parse::parse_code;
use crate::write::{class_to_bytes, to_bytes};

const ACC_PUBLIC_STATIC: u16 = 0x0009;
const ACC_PUBLIC_ABSTRACT: u16 = 0x0401;

/// Assembles a minimal Java 11 class with deduplicated constants.
pub(crate) struct ClassBuilder {
    constants: Vec<Constant>,
    this_class: u16,
    super_class: u16,
    methods: Vec<Method>,
    attributes: Vec<Attribute>,
}

impl ClassBuilder {
    pub(crate) fn new(name: &str) -> Self {
        let mut builder = Self {
            constants: vec![Constant::Unusable],
            this_class: 0,
            super_class: 0,
            methods: Vec::new(),
            attributes: Vec::new(),
        };
        builder.this_class = builder.class(name);
        builder.super_class = builder.class("java/lang/Object");
        builder
    }

    fn intern(&mut self, constant: Constant) -> u16 {
        if let Some(index) = self.constants.iter().position(|c| *c == constant) {
            return index as u16;
        }
        let index = self.constants.len() as u16;
        let wide = constant.width() == 2;
        self.constants.push(constant);
        if wide {
            self.constants.push(Constant::Unusable);
        }
        index
    }

    pub(crate) fn utf8(&mut self, text: &str) -> u16 {
        self.intern(Constant::Utf8(text.as_bytes().to_vec()))
    }

    pub(crate) fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.intern(Constant::Class { name_index })
    }

    pub(crate) fn long_constant(&mut self, value: i64) -> u16 {
        self.intern(Constant::Long(value))
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.intern(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub(crate) fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.intern(Constant::MethodRef {
            class_index,
            name_and_type_index,
        })
    }

    pub(crate) fn interface_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> u16 {
        let class_index = self.class(owner);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.intern(Constant::InterfaceMethodRef {
            class_index,
            name_and_type_index,
        })
    }

    pub(crate) fn attribute(&mut self, name: &str, info: Vec<u8>) -> &mut Self {
        let name_index = self.utf8(name);
        self.attributes.push(Attribute { name_index, info });
        self
    }

    pub(crate) fn nest_host(&mut self, host: &str) -> &mut Self {
        let host_index = self.class(host);
        self.attribute("NestHost", host_index.to_be_bytes().to_vec())
    }

    pub(crate) fn nest_members(&mut self, members: &[&str]) -> &mut Self {
        let mut info = Vec::new();
        info.write_u16::<BigEndian>(members.len() as u16).expect("write count");
        for member in members {
            let index = self.class(member);
            info.write_u16::<BigEndian>(index).expect("write member");
        }
        self.attribute("NestMembers", info)
    }

    pub(crate) fn source_file(&mut self, file: &str) -> &mut Self {
        let file_index = self.utf8(file);
        self.attribute("SourceFile", file_index.to_be_bytes().to_vec())
    }

    pub(crate) fn method(
        &mut self,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
    ) -> &mut Self {
        self.method_with_code(
            name,
            descriptor,
            Code {
                max_stack,
                max_locals,
                code,
                exception_table: Vec::new(),
                attributes: Vec::new(),
            },
        )
    }

    pub(crate) fn method_with_code(
        &mut self,
        name: &str,
        descriptor: &str,
        code: Code,
    ) -> &mut Self {
        let code_name = self.utf8("Code");
        let info = to_bytes(&code).expect("serialize code");
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.methods.push(Method {
            access_flags: ACC_PUBLIC_STATIC,
            name_index,
            descriptor_index,
            attributes: vec![Attribute {
                name_index: code_name,
                info,
            }],
        });
        self
    }

    pub(crate) fn abstract_method(&mut self, name: &str, descriptor: &str) -> &mut Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.methods.push(Method {
            access_flags: ACC_PUBLIC_ABSTRACT,
            name_index,
            descriptor_index,
            attributes: Vec::new(),
        });
        self
    }

    pub(crate) fn build(&self) -> ClassFile {
        ClassFile {
            minor_version: 0,
            major_version: 55,
            constant_pool: ConstantPool::new(self.constants.clone()),
            access_flags: 0x0021,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: self.methods.clone(),
            attributes: self.attributes.clone(),
        }
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        class_to_bytes(&self.build()).expect("serialize class")
    }
}

pub(crate) fn invokevirtual(index: u16) -> Vec<u8> {
    let [high, low] = index.to_be_bytes();
    vec![INVOKEVIRTUAL, high, low]
}

/// Decoded body of the named method, or `None` when it has no Code attribute.
pub(crate) fn method_code(class: &ClassFile, name: &str) -> Option<Code> {
    let pool = &class.constant_pool;
    let method = class
        .methods
        .iter()
        .find(|method| method.name(pool).expect("method name") == name)
        .expect("method exists");
    let position = method.code_position(pool)?;
    Some(parse_code(&method.attributes[position].info).expect("parse code"))
}

/// Opcode of every instruction in `code`, in order.
pub(crate) fn opcodes_of(code: &[u8]) -> Vec<u8> {
    decode(code)
        .expect("decode")
        .into_iter()
        .map(|instruction| instruction.opcode)
        .collect()
}
