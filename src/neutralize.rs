use std::collections::BTreeMap;

use log::trace;

use crate::bytecode::{assemble, call_site, decode};
use crate::descriptor::{MethodDescriptor, ReturnType, TypeCategory};
use crate::error::Result;
use crate::ir::{CallKind, CallSite, Code, ConstantPool, Method};
use crate::opcodes::{BIPUSH, DCONST_0, FCONST_0, LCONST_0, NOP, POP, POP2};
use crate::parse::parse_code;
use crate::relocate::{relocate_code_attributes, relocate_exception_table};
use crate::write::to_bytes;

/// Owner of the signature-polymorphic calls that get neutralized.
pub(crate) const METHOD_HANDLE: &str = "java/lang/invoke/MethodHandle";

const NEUTRALIZED_METHODS: [&str; 2] = ["invoke", "invokeExact"];

/// Value pushed in place of an int-category result. Carries no meaning.
pub(crate) const PLACEHOLDER: i8 = 42;

/// What happens to the receiver once the arguments are discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Trailing {
    /// Reference return: the receiver stands in for the result.
    KeepReceiver,
    /// Void return.
    DiscardReceiver,
    /// Primitive return: a placeholder of the result's category is pushed.
    DiscardReceiverAndPush(TypeCategory),
}

/// Instruction sequence replacing one neutralized call, derived from its
/// descriptor alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Replacement {
    /// Argument categories in the order they are popped (last argument first).
    discards: Vec<TypeCategory>,
    trailing: Trailing,
}

impl Replacement {
    pub(crate) fn for_descriptor(descriptor: &MethodDescriptor) -> Self {
        let trailing = match descriptor.return_type {
            ReturnType::Value(TypeCategory::Reference) => Trailing::KeepReceiver,
            ReturnType::Void => Trailing::DiscardReceiver,
            ReturnType::Value(category) => Trailing::DiscardReceiverAndPush(category),
        };
        Self {
            discards: descriptor.parameters.iter().rev().copied().collect(),
            trailing,
        }
    }

    /// Number of argument discards; always the descriptor's parameter count.
    pub(crate) fn discard_count(&self) -> usize {
        self.discards.len()
    }

    pub(crate) fn trailing(&self) -> Trailing {
        self.trailing
    }

    /// Encode the replacement. Each argument is one discard instruction;
    /// `long` and `double` arguments use `pop2` so the discard matches the
    /// value's width.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out: Vec<u8> = self
            .discards
            .iter()
            .map(|category| if category.is_wide() { POP2 } else { POP })
            .collect();
        match self.trailing {
            Trailing::KeepReceiver => {}
            Trailing::DiscardReceiver => out.push(POP),
            Trailing::DiscardReceiverAndPush(category) => {
                out.push(POP);
                out.extend_from_slice(&placeholder(category));
            }
        }
        // Offsets that pointed at the call (branch targets, handler ranges)
        // need an instruction to land on.
        if out.is_empty() {
            out.push(NOP);
        }
        out
    }
}

fn placeholder(category: TypeCategory) -> Vec<u8> {
    match category {
        TypeCategory::Long => vec![LCONST_0],
        TypeCategory::Float => vec![FCONST_0],
        TypeCategory::Double => vec![DCONST_0],
        _ => vec![BIPUSH, PLACEHOLDER as u8],
    }
}

/// Whether a call site is one of the `MethodHandle` invocations to neutralize.
pub(crate) fn is_neutralized(call: &CallSite) -> bool {
    call.kind == CallKind::Virtual
        && !call.method.is_interface
        && call.method.owner == METHOD_HANDLE
        && NEUTRALIZED_METHODS.contains(&call.method.name.as_str())
}

/// Rewrite every neutralized call in `code`. Returns `None` when the body has
/// no matching call, in which case it must be left byte-for-byte untouched.
pub(crate) fn neutralize_code(pool: &ConstantPool, code: &Code) -> Result<Option<(Code, usize)>> {
    let instructions = decode(&code.code)?;
    let mut replacements = BTreeMap::new();
    for instruction in &instructions {
        let Some(call) = call_site(pool, instruction)? else {
            continue;
        };
        if !is_neutralized(&call) {
            continue;
        }
        let descriptor = MethodDescriptor::parse(&call.method.descriptor)?;
        let replacement = Replacement::for_descriptor(&descriptor);
        debug_assert_eq!(replacement.discard_count(), descriptor.parameter_count());
        trace!(
            "{}{} at {}: {} discard(s), {:?}",
            call.method.name,
            call.method.descriptor,
            call.offset,
            replacement.discard_count(),
            replacement.trailing()
        );
        replacements.insert(instruction.offset, replacement.encode());
    }
    if replacements.is_empty() {
        return Ok(None);
    }

    let assembled = assemble(&code.code, &instructions, &replacements)?;
    let rewritten = Code {
        max_stack: code.max_stack,
        max_locals: code.max_locals,
        exception_table: relocate_exception_table(&code.exception_table, &assembled.offsets)?,
        attributes: relocate_code_attributes(pool, &code.attributes, &assembled.offsets)?,
        code: assembled.code,
    };
    Ok(Some((rewritten, replacements.len())))
}

/// Neutralize the body of one method in place; returns the number of
/// rewritten call sites.
pub(crate) fn neutralize_method(pool: &ConstantPool, method: &mut Method) -> Result<usize> {
    let Some(position) = method.code_position(pool) else {
        return Ok(0);
    };
    let code = parse_code(&method.attributes[position].info)?;
    let Some((rewritten, count)) = neutralize_code(pool, &code)? else {
        return Ok(0);
    };
    method.attributes[position].info = to_bytes(&rewritten)?;
    Ok(count)
}
