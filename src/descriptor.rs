use std::iter::Peekable;
use std::str::Chars;

use crate::error::{DesugarError, Result};

/// Category of a single value type in a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum TypeCategory {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// Object or array type.
    Reference,
}

impl TypeCategory {
    /// Whether the value takes two operand stack slots.
    pub(crate) fn is_wide(self) -> bool {
        matches!(self, TypeCategory::Long | TypeCategory::Double)
    }
}

/// Return type of a method descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ReturnType {
    Void,
    Value(TypeCategory),
}

/// Parsed method descriptor, e.g. `(Ljava/lang/String;CC)Ljava/lang/String;`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MethodDescriptor {
    pub(crate) parameters: Vec<TypeCategory>,
    pub(crate) return_type: ReturnType,
}

impl MethodDescriptor {
    pub(crate) fn parse(source: &str) -> Result<Self> {
        let fail = |reason: &str| DesugarError::BadDescriptor {
            descriptor: source.to_string(),
            reason: reason.to_string(),
        };

        let mut chars = source.chars().peekable();
        if chars.next() != Some('(') {
            return Err(fail("expected '('"));
        }
        let mut parameters = Vec::new();
        loop {
            match chars.peek() {
                Some(')') => {
                    chars.next();
                    break;
                }
                Some(_) => parameters.push(parse_field_type(&mut chars).map_err(|r| fail(r))?),
                None => return Err(fail("missing ')'")),
            }
        }
        let return_type = match chars.peek() {
            Some('V') => {
                chars.next();
                ReturnType::Void
            }
            _ => ReturnType::Value(parse_field_type(&mut chars).map_err(|r| fail(r))?),
        };
        if let Some(c) = chars.next() {
            return Err(fail(&format!("unexpected leftover input '{c}'")));
        }

        Ok(Self {
            parameters,
            return_type,
        })
    }

    pub(crate) fn parameter_count(&self) -> usize {
        self.parameters.len()
    }
}

fn parse_field_type(
    chars: &mut Peekable<Chars<'_>>,
) -> std::result::Result<TypeCategory, &'static str> {
    let category = match chars.next() {
        Some('Z') => TypeCategory::Boolean,
        Some('B') => TypeCategory::Byte,
        Some('C') => TypeCategory::Char,
        Some('S') => TypeCategory::Short,
        Some('I') => TypeCategory::Int,
        Some('J') => TypeCategory::Long,
        Some('F') => TypeCategory::Float,
        Some('D') => TypeCategory::Double,
        Some('L') => {
            let mut empty = true;
            loop {
                match chars.next() {
                    Some(';') if !empty => break,
                    Some(';') => return Err("empty class name"),
                    Some('.' | '[') => return Err("invalid character in class name"),
                    Some(_) => empty = false,
                    None => return Err("unterminated class name"),
                }
            }
            TypeCategory::Reference
        }
        Some('[') => {
            parse_field_type(chars)?;
            TypeCategory::Reference
        }
        Some(_) => return Err("invalid type character"),
        None => return Err("missing type"),
    };
    Ok(category)
}
