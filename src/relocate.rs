//! Relocation of offset-carrying Code attributes after a body changed length.

use byteorder::{BigEndian, WriteBytesExt};
use log::debug;

use crate::bytecode::OffsetMap;
use crate::error::{DesugarError, Result};
use crate::ir::{Attribute, ConstantPool, ExceptionHandler};
use crate::parse::Reader;

const LINE_NUMBER_TABLE: &str = "LineNumberTable";
const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
const STACK_MAP_TABLE: &str = "StackMapTable";
const VISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeVisibleTypeAnnotations";
const INVISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeInvisibleTypeAnnotations";

pub(crate) fn relocate_exception_table(
    handlers: &[ExceptionHandler],
    offsets: &OffsetMap,
) -> Result<Vec<ExceptionHandler>> {
    handlers
        .iter()
        .map(|handler| {
            Ok(ExceptionHandler {
                start_pc: offsets.map_u16(handler.start_pc)?,
                end_pc: offsets.map_u16(handler.end_pc)?,
                handler_pc: offsets.map_u16(handler.handler_pc)?,
                catch_type: handler.catch_type,
            })
        })
        .collect()
}

/// Rewrite the attributes nested in a Code attribute against `offsets`.
///
/// Code-level type annotations are dropped; unknown attributes are kept as is.
pub(crate) fn relocate_code_attributes(
    pool: &ConstantPool,
    attributes: &[Attribute],
    offsets: &OffsetMap,
) -> Result<Vec<Attribute>> {
    let mut relocated = Vec::with_capacity(attributes.len());
    for attribute in attributes {
        let info = if attribute.is_named(pool, LINE_NUMBER_TABLE) {
            relocate_line_numbers(&attribute.info, offsets)?
        } else if attribute.is_named(pool, LOCAL_VARIABLE_TABLE)
            || attribute.is_named(pool, LOCAL_VARIABLE_TYPE_TABLE)
        {
            relocate_local_variables(&attribute.info, offsets)?
        } else if attribute.is_named(pool, STACK_MAP_TABLE) {
            relocate_stack_map(&attribute.info, offsets)?
        } else if attribute.is_named(pool, VISIBLE_TYPE_ANNOTATIONS)
            || attribute.is_named(pool, INVISIBLE_TYPE_ANNOTATIONS)
        {
            debug!("dropping code type annotations of a rewritten body");
            continue;
        } else {
            attribute.info.clone()
        };
        relocated.push(Attribute {
            name_index: attribute.name_index,
            info,
        });
    }
    Ok(relocated)
}

fn relocate_line_numbers(info: &[u8], offsets: &OffsetMap) -> Result<Vec<u8>> {
    let mut reader = Reader::new(info);
    let entries = reader.read_vec(|r| Ok((r.read_u16()?, r.read_u16()?)))?;
    reader.finish()?;

    let mut out = Vec::with_capacity(info.len());
    out.write_u16::<BigEndian>(entries.len() as u16)?;
    for (start_pc, line) in entries {
        out.write_u16::<BigEndian>(offsets.map_u16(start_pc)?)?;
        out.write_u16::<BigEndian>(line)?;
    }
    Ok(out)
}

/// Shared by `LocalVariableTable` and `LocalVariableTypeTable`; only the
/// meaning of the fourth field differs.
fn relocate_local_variables(info: &[u8], offsets: &OffsetMap) -> Result<Vec<u8>> {
    let mut reader = Reader::new(info);
    let entries = reader.read_vec(|r| {
        Ok([
            r.read_u16()?,
            r.read_u16()?,
            r.read_u16()?,
            r.read_u16()?,
            r.read_u16()?,
        ])
    })?;
    reader.finish()?;

    let mut out = Vec::with_capacity(info.len());
    out.write_u16::<BigEndian>(entries.len() as u16)?;
    for [start_pc, length, name_index, descriptor_index, index] in entries {
        let start = offsets.map_u16(start_pc)?;
        let end = offsets.map(start_pc as usize + length as usize)?;
        out.write_u16::<BigEndian>(start)?;
        out.write_u16::<BigEndian>((end - start as usize) as u16)?;
        out.write_u16::<BigEndian>(name_index)?;
        out.write_u16::<BigEndian>(descriptor_index)?;
        out.write_u16::<BigEndian>(index)?;
    }
    Ok(out)
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(u16),
    /// Offset of the `new` instruction that created the value.
    Uninitialized(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum FrameKind {
    Same,
    SameLocalsOneStack(VerificationType),
    Chop(u8),
    Append(Vec<VerificationType>),
    Full {
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

/// Stack map frame at an absolute code offset.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Frame {
    offset: usize,
    kind: FrameKind,
}

fn relocate_stack_map(info: &[u8], offsets: &OffsetMap) -> Result<Vec<u8>> {
    let frames = read_frames(info)?;
    let relocated = frames
        .into_iter()
        .map(|frame| {
            Ok(Frame {
                offset: offsets.map(frame.offset)?,
                kind: relocate_frame_kind(frame.kind, offsets)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    write_frames(&relocated)
}

fn relocate_frame_kind(kind: FrameKind, offsets: &OffsetMap) -> Result<FrameKind> {
    let relocate_all = |types: Vec<VerificationType>| -> Result<Vec<VerificationType>> {
        types
            .into_iter()
            .map(|t| relocate_type(t, offsets))
            .collect()
    };
    Ok(match kind {
        FrameKind::SameLocalsOneStack(t) => {
            FrameKind::SameLocalsOneStack(relocate_type(t, offsets)?)
        }
        FrameKind::Append(locals) => FrameKind::Append(relocate_all(locals)?),
        FrameKind::Full { locals, stack } => FrameKind::Full {
            locals: relocate_all(locals)?,
            stack: relocate_all(stack)?,
        },
        other => other,
    })
}

fn relocate_type(t: VerificationType, offsets: &OffsetMap) -> Result<VerificationType> {
    Ok(match t {
        VerificationType::Uninitialized(offset) => {
            VerificationType::Uninitialized(offsets.map(offset)?)
        }
        other => other,
    })
}

fn read_frames(info: &[u8]) -> Result<Vec<Frame>> {
    let mut reader = Reader::new(info);
    let count = reader.read_u16()?;
    let mut frames = Vec::with_capacity(count as usize);
    let mut previous: Option<usize> = None;
    for _ in 0..count {
        let tag = reader.read_u8()?;
        let (delta, kind) = match tag {
            0..=63 => (tag as usize, FrameKind::Same),
            64..=127 => (
                (tag - 64) as usize,
                FrameKind::SameLocalsOneStack(read_type(&mut reader)?),
            ),
            247 => {
                let delta = reader.read_u16()? as usize;
                (delta, FrameKind::SameLocalsOneStack(read_type(&mut reader)?))
            }
            248..=250 => (reader.read_u16()? as usize, FrameKind::Chop(251 - tag)),
            251 => (reader.read_u16()? as usize, FrameKind::Same),
            252..=254 => {
                let delta = reader.read_u16()? as usize;
                let locals = (0..tag - 251)
                    .map(|_| read_type(&mut reader))
                    .collect::<Result<Vec<_>>>()?;
                (delta, FrameKind::Append(locals))
            }
            255 => {
                let delta = reader.read_u16()? as usize;
                let locals = reader.read_vec(read_type)?;
                let stack = reader.read_vec(read_type)?;
                (delta, FrameKind::Full { locals, stack })
            }
            _ => return Err(DesugarError::BadStackMapFrame(tag)),
        };
        let offset = match previous {
            None => delta,
            Some(prev) => prev + delta + 1,
        };
        previous = Some(offset);
        frames.push(Frame { offset, kind });
    }
    reader.finish()?;
    Ok(frames)
}

fn read_type(reader: &mut Reader<'_>) -> Result<VerificationType> {
    let tag = reader.read_u8()?;
    Ok(match tag {
        0 => VerificationType::Top,
        1 => VerificationType::Integer,
        2 => VerificationType::Float,
        3 => VerificationType::Double,
        4 => VerificationType::Long,
        5 => VerificationType::Null,
        6 => VerificationType::UninitializedThis,
        7 => VerificationType::Object(reader.read_u16()?),
        8 => VerificationType::Uninitialized(reader.read_u16()? as usize),
        _ => return Err(DesugarError::BadVerificationType(tag)),
    })
}

/// Encode frames, picking the most compact frame type for each new delta.
fn write_frames(frames: &[Frame]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.write_u16::<BigEndian>(frames.len() as u16)?;
    let mut previous: Option<usize> = None;
    for frame in frames {
        let delta = match previous {
            None => frame.offset,
            Some(prev) => frame.offset - prev - 1,
        };
        previous = Some(frame.offset);
        let delta = u16::try_from(delta).map_err(|_| DesugarError::CodeTooLarge(delta))?;
        match &frame.kind {
            FrameKind::Same if delta <= 63 => out.push(delta as u8),
            FrameKind::Same => {
                out.push(251);
                out.write_u16::<BigEndian>(delta)?;
            }
            FrameKind::SameLocalsOneStack(t) => {
                if delta <= 63 {
                    out.push(64 + delta as u8);
                } else {
                    out.push(247);
                    out.write_u16::<BigEndian>(delta)?;
                }
                write_type(&mut out, t)?;
            }
            FrameKind::Chop(k) => {
                out.push(251 - k);
                out.write_u16::<BigEndian>(delta)?;
            }
            FrameKind::Append(locals) => {
                out.push(251 + locals.len() as u8);
                out.write_u16::<BigEndian>(delta)?;
                for t in locals {
                    write_type(&mut out, t)?;
                }
            }
            FrameKind::Full { locals, stack } => {
                out.push(255);
                out.write_u16::<BigEndian>(delta)?;
                out.write_u16::<BigEndian>(locals.len() as u16)?;
                for t in locals {
                    write_type(&mut out, t)?;
                }
                out.write_u16::<BigEndian>(stack.len() as u16)?;
                for t in stack {
                    write_type(&mut out, t)?;
                }
            }
        }
    }
    Ok(out)
}

fn write_type(out: &mut Vec<u8>, t: &VerificationType) -> Result<()> {
    match t {
        VerificationType::Top => out.push(0),
        VerificationType::Integer => out.push(1),
        VerificationType::Float => out.push(2),
        VerificationType::Double => out.push(3),
        VerificationType::Long => out.push(4),
        VerificationType::Null => out.push(5),
        VerificationType::UninitializedThis => out.push(6),
        VerificationType::Object(index) => {
            out.push(7);
            out.write_u16::<BigEndian>(*index)?;
        }
        VerificationType::Uninitialized(offset) => {
            out.push(8);
            let offset = u16::try_from(*offset).map_err(|_| DesugarError::CodeTooLarge(*offset))?;
            out.write_u16::<BigEndian>(offset)?;
        }
    }
    Ok(())
}
