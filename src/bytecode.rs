use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::error::{DesugarError, Result};
use crate::ir::{CallKind, CallSite, ConstantPool};
use crate::opcodes;

/// Largest legal `code_length` of a method body.
const MAX_CODE_LENGTH: usize = 65535;

/// Bytecode instruction decoded from a Code array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Instruction {
    pub(crate) offset: usize,
    pub(crate) length: usize,
    pub(crate) opcode: u8,
    pub(crate) kind: InstructionKind,
}

/// Instruction kinds the rewriter has to look inside of. Branch targets are
/// absolute offsets into the original Code array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum InstructionKind {
    Invoke(u16),
    Branch(usize),
    WideBranch(usize),
    TableSwitch {
        default: usize,
        low: i32,
        high: i32,
        targets: Vec<usize>,
    },
    LookupSwitch {
        default: usize,
        pairs: Vec<(i32, usize)>,
    },
    Other,
}

/// Decode a Code array into its instruction sequence.
pub(crate) fn decode(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let opcode = code[offset];
        let length = opcode_length(code, offset)?;
        if offset + length > code.len() {
            return Err(DesugarError::Truncated {
                offset,
                wanted: offset + length - code.len(),
            });
        }
        let kind = match opcode {
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
                InstructionKind::Invoke(read_u16(code, offset + 1)?)
            }
            opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
                let branch = read_i16(code, offset + 1)?;
                InstructionKind::Branch(branch_target(code, offset, branch as i64)?)
            }
            opcodes::GOTO_W | opcodes::JSR_W => {
                let branch = read_i32(code, offset + 1)?;
                InstructionKind::WideBranch(branch_target(code, offset, branch as i64)?)
            }
            opcodes::TABLESWITCH => tableswitch(code, offset)?,
            opcodes::LOOKUPSWITCH => lookupswitch(code, offset)?,
            _ => InstructionKind::Other,
        };
        instructions.push(Instruction {
            offset,
            length,
            opcode,
            kind,
        });
        offset += length;
    }
    Ok(instructions)
}

/// Resolve the method an invoke instruction calls. `invokedynamic` and
/// non-call instructions yield `None`.
pub(crate) fn call_site(
    pool: &ConstantPool,
    instruction: &Instruction,
) -> Result<Option<CallSite>> {
    let InstructionKind::Invoke(index) = instruction.kind else {
        return Ok(None);
    };
    let kind = match instruction.opcode {
        opcodes::INVOKEVIRTUAL => CallKind::Virtual,
        opcodes::INVOKESPECIAL => CallKind::Special,
        opcodes::INVOKESTATIC => CallKind::Static,
        _ => CallKind::Interface,
    };
    Ok(Some(CallSite {
        method: pool.method_ref(index)?,
        kind,
        offset: instruction.offset,
    }))
}

fn branch_target(code: &[u8], offset: usize, branch: i64) -> Result<usize> {
    let target = offset as i64 + branch;
    if target < 0 || target >= code.len() as i64 {
        return Err(DesugarError::BranchOutsideBody {
            from: offset,
            to: target,
        });
    }
    Ok(target as usize)
}

fn tableswitch(code: &[u8], offset: usize) -> Result<InstructionKind> {
    let base = offset + 1 + padding(offset);
    let default = branch_target(code, offset, read_i32(code, base)? as i64)?;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let mut targets = Vec::new();
    let mut idx = base + 12;
    for _ in low..=high {
        targets.push(branch_target(code, offset, read_i32(code, idx)? as i64)?);
        idx += 4;
    }
    Ok(InstructionKind::TableSwitch {
        default,
        low,
        high,
        targets,
    })
}

fn lookupswitch(code: &[u8], offset: usize) -> Result<InstructionKind> {
    let base = offset + 1 + padding(offset);
    let default = branch_target(code, offset, read_i32(code, base)? as i64)?;
    let npairs = read_i32(code, base + 4)?;
    let mut pairs = Vec::new();
    let mut idx = base + 8;
    for _ in 0..npairs {
        let key = read_i32(code, idx)?;
        let target = branch_target(code, offset, read_i32(code, idx + 4)? as i64)?;
        pairs.push((key, target));
        idx += 8;
    }
    Ok(InstructionKind::LookupSwitch { default, pairs })
}

/// Encoded length of the instruction starting at `offset`.
pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f
        | 0x1a..=0x35
        | 0x3b..=0x83
        | 0x85..=0x98
        | opcodes::IRETURN..=opcodes::RETURN
        | 0xbe
        | opcodes::ATHROW
        | 0xc2
        | opcodes::MONITOREXIT => 1,
        opcodes::BIPUSH
        | opcodes::LDC
        | opcodes::ILOAD..=opcodes::ALOAD
        | opcodes::ISTORE..=opcodes::ASTORE
        | opcodes::RET
        | opcodes::NEWARRAY => 2,
        opcodes::SIPUSH
        | opcodes::LDC_W
        | opcodes::LDC2_W
        | opcodes::IINC
        | opcodes::IFEQ..=opcodes::JSR
        | opcodes::GETSTATIC..=opcodes::INVOKESTATIC
        | opcodes::NEW
        | opcodes::ANEWARRAY
        | opcodes::CHECKCAST
        | opcodes::INSTANCEOF
        | opcodes::IFNULL
        | opcodes::IFNONNULL => 3,
        opcodes::MULTIANEWARRAY => 4,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC | opcodes::GOTO_W | opcodes::JSR_W => 5,
        opcodes::WIDE => {
            if code.get(offset + 1) == Some(&opcodes::IINC) {
                6
            } else {
                4
            }
        }
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let low = read_i32(code, base + 4)? as i64;
            let high = read_i32(code, base + 8)? as i64;
            if high < low {
                return Err(DesugarError::BadSwitch(offset));
            }
            (base - offset) + 12 + 4 * (high - low + 1) as usize
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let npairs = read_i32(code, base + 4)?;
            if npairs < 0 {
                return Err(DesugarError::BadSwitch(offset));
            }
            (base - offset) + 8 + 8 * npairs as usize
        }
        _ => return Err(DesugarError::UnknownOpcode { opcode, offset }),
    };
    Ok(length)
}

/// Switch operands start at the next multiple of four after the opcode.
pub(crate) fn padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let bytes = slice(code, offset, 2)?;
    Ok(BigEndian::read_u16(bytes))
}

fn read_i16(code: &[u8], offset: usize) -> Result<i16> {
    Ok(BigEndian::read_i16(slice(code, offset, 2)?))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    Ok(BigEndian::read_i32(slice(code, offset, 4)?))
}

fn slice(code: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    code.get(offset..offset + len).ok_or(DesugarError::Truncated {
        offset,
        wanted: (offset + len).saturating_sub(code.len()),
    })
}

/// Mapping from instruction offsets of an original body to the re-assembled one.
#[derive(Clone, Debug, Default)]
pub(crate) struct OffsetMap {
    starts: BTreeMap<usize, usize>,
    old_len: usize,
    new_len: usize,
}

impl OffsetMap {
    /// New offset of the instruction that started at `old`; the end of the
    /// body maps to the end of the new body.
    pub(crate) fn map(&self, old: usize) -> Result<usize> {
        if old == self.old_len {
            return Ok(self.new_len);
        }
        self.starts
            .get(&old)
            .copied()
            .ok_or(DesugarError::BadOffset(old))
    }

    pub(crate) fn map_u16(&self, old: u16) -> Result<u16> {
        let new = self.map(old as usize)?;
        u16::try_from(new).map_err(|_| DesugarError::CodeTooLarge(new))
    }
}

/// Re-assembled Code array plus the offset relocation that produced it.
#[derive(Debug)]
pub(crate) struct Assembled {
    pub(crate) code: Vec<u8>,
    pub(crate) offsets: OffsetMap,
}

/// Re-encode `instructions`, substituting the bytes in `replacements` (keyed by
/// original offset) and relocating every branch and switch operand.
pub(crate) fn assemble(
    code: &[u8],
    instructions: &[Instruction],
    replacements: &BTreeMap<usize, Vec<u8>>,
) -> Result<Assembled> {
    let mut starts = BTreeMap::new();
    let mut cursor = 0;
    for inst in instructions {
        starts.insert(inst.offset, cursor);
        cursor += match (replacements.get(&inst.offset), &inst.kind) {
            (Some(replacement), _) => replacement.len(),
            (None, InstructionKind::TableSwitch { .. } | InstructionKind::LookupSwitch { .. }) => {
                let operands = inst.length - 1 - padding(inst.offset);
                1 + padding(cursor) + operands
            }
            (None, _) => inst.length,
        };
    }
    if cursor > MAX_CODE_LENGTH {
        return Err(DesugarError::CodeTooLarge(cursor));
    }
    let offsets = OffsetMap {
        starts,
        old_len: code.len(),
        new_len: cursor,
    };

    let mut out: Vec<u8> = Vec::with_capacity(cursor);
    for inst in instructions {
        let at = out.len();
        if let Some(replacement) = replacements.get(&inst.offset) {
            out.extend_from_slice(replacement);
            continue;
        }
        match &inst.kind {
            InstructionKind::Branch(target) => {
                let delta = relative(at, offsets.map(*target)?);
                let delta = i16::try_from(delta).map_err(|_| DesugarError::BranchOutOfRange {
                    from: inst.offset,
                    to: *target,
                })?;
                out.push(inst.opcode);
                out.write_i16::<BigEndian>(delta)?;
            }
            InstructionKind::WideBranch(target) => {
                out.push(inst.opcode);
                write_relative(&mut out, at, offsets.map(*target)?, inst.offset)?;
            }
            InstructionKind::TableSwitch {
                default,
                low,
                high,
                targets,
            } => {
                out.push(inst.opcode);
                out.resize(out.len() + padding(at), 0);
                write_relative(&mut out, at, offsets.map(*default)?, inst.offset)?;
                out.write_i32::<BigEndian>(*low)?;
                out.write_i32::<BigEndian>(*high)?;
                for target in targets {
                    write_relative(&mut out, at, offsets.map(*target)?, inst.offset)?;
                }
            }
            InstructionKind::LookupSwitch { default, pairs } => {
                out.push(inst.opcode);
                out.resize(out.len() + padding(at), 0);
                write_relative(&mut out, at, offsets.map(*default)?, inst.offset)?;
                out.write_i32::<BigEndian>(pairs.len() as i32)?;
                for (key, target) in pairs {
                    out.write_i32::<BigEndian>(*key)?;
                    write_relative(&mut out, at, offsets.map(*target)?, inst.offset)?;
                }
            }
            InstructionKind::Invoke(_) | InstructionKind::Other => {
                out.extend_from_slice(&code[inst.offset..inst.offset + inst.length]);
            }
        }
    }
    debug_assert_eq!(out.len(), offsets.new_len);

    Ok(Assembled { code: out, offsets })
}

fn relative(from: usize, to: usize) -> i64 {
    to as i64 - from as i64
}

fn write_relative(out: &mut Vec<u8>, from: usize, to: usize, original: usize) -> Result<()> {
    let delta = i32::try_from(relative(from, to)).map_err(|_| DesugarError::BranchOutOfRange {
        from: original,
        to,
    })?;
    out.write_i32::<BigEndian>(delta)?;
    Ok(())
}
