//! Structural bytecode verification
//!
//! Checks generated class files before they are written out: every byte
//! decodes as an instruction, branches land on instruction boundaries,
//! string-pool and local references are in range, control cannot fall off
//! the end of a body, and exception-table entries cover valid ranges.

use std::collections::HashSet;

use crate::classfile::{ClassFile, MethodDef};
use crate::opcode::Opcode;

/// Bytecode verification errors
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Invalid opcode
    #[error("invalid opcode {opcode:#04x} at offset {offset} in {method}")]
    InvalidOpcode {
        method: String,
        opcode: u8,
        offset: usize,
    },

    /// Operands truncated at end of code
    #[error("truncated operands at offset {offset} in {method}")]
    TruncatedOperands { method: String, offset: usize },

    /// Branch target is not an instruction boundary
    #[error("invalid branch target {target} at offset {offset} in {method}")]
    InvalidBranchTarget {
        method: String,
        target: i64,
        offset: usize,
    },

    /// String-pool reference out of range
    #[error("invalid string-pool reference {index} at offset {offset} in {method}")]
    InvalidPoolRef {
        method: String,
        index: u16,
        offset: usize,
    },

    /// Local slot out of range
    #[error("local slot {slot} exceeds max_locals {max} at offset {offset} in {method}")]
    InvalidLocalSlot {
        method: String,
        slot: u16,
        max: u16,
        offset: usize,
    },

    /// Execution can fall off the end of the body
    #[error("execution falls off end of {method} at offset {offset}")]
    FallOffEnd { method: String, offset: usize },

    /// Exception-table entry with a bad range or handler
    #[error("invalid exception entry ({start}..{end} -> {handler}) in {method}")]
    InvalidExceptionEntry {
        method: String,
        start: u32,
        end: u32,
        handler: u32,
    },
}

/// Verify every method body of a class file
pub fn verify_class(class: &ClassFile) -> Result<(), VerifyError> {
    for method in &class.methods {
        verify_method(class, method)?;
    }
    Ok(())
}

fn verify_method(class: &ClassFile, method: &MethodDef) -> Result<(), VerifyError> {
    // Abstract methods carry no code
    if method.is_abstract() && method.code.is_empty() {
        return Ok(());
    }

    let instructions = parse_instructions(&method.name, &method.code)?;
    let boundaries: HashSet<usize> = instructions.iter().map(|i| i.offset).collect();

    for instr in &instructions {
        check_branch(method, instr, &method.code, &boundaries)?;
        check_pool_refs(class, method, instr)?;
        check_local_refs(method, instr)?;
    }

    match instructions.last() {
        Some(last) if last.opcode.is_terminator() => {}
        Some(last) => {
            return Err(VerifyError::FallOffEnd {
                method: method.name.clone(),
                offset: last.offset,
            });
        }
        None => {
            return Err(VerifyError::FallOffEnd {
                method: method.name.clone(),
                offset: 0,
            });
        }
    }

    for entry in &method.exceptions {
        let range_ok = entry.start < entry.end
            && entry.end as usize <= method.code.len()
            && boundaries.contains(&(entry.start as usize))
            && boundaries.contains(&(entry.handler as usize));
        if !range_ok {
            return Err(VerifyError::InvalidExceptionEntry {
                method: method.name.clone(),
                start: entry.start,
                end: entry.end,
                handler: entry.handler,
            });
        }
    }

    Ok(())
}

#[derive(Debug)]
struct Instruction {
    offset: usize,
    opcode: Opcode,
    operands: Vec<u8>,
}

fn parse_instructions(method: &str, code: &[u8]) -> Result<Vec<Instruction>, VerifyError> {
    let mut instructions = Vec::new();
    let mut pos = 0;

    while pos < code.len() {
        let offset = pos;
        let byte = code[pos];
        pos += 1;

        let opcode = Opcode::try_from(byte).map_err(|opcode| VerifyError::InvalidOpcode {
            method: method.to_string(),
            opcode,
            offset,
        })?;

        let width = opcode.operand_width();
        if pos + width > code.len() {
            return Err(VerifyError::TruncatedOperands {
                method: method.to_string(),
                offset,
            });
        }
        let operands = code[pos..pos + width].to_vec();
        pos += width;

        instructions.push(Instruction {
            offset,
            opcode,
            operands,
        });
    }

    Ok(instructions)
}

/// Branch operands are i16 offsets relative to the end of the instruction
fn check_branch(
    method: &MethodDef,
    instr: &Instruction,
    code: &[u8],
    boundaries: &HashSet<usize>,
) -> Result<(), VerifyError> {
    if !instr.opcode.is_branch() {
        return Ok(());
    }
    let rel = i16::from_le_bytes([instr.operands[0], instr.operands[1]]) as i64;
    let base = (instr.offset + 1 + instr.operands.len()) as i64;
    let target = base + rel;

    // A branch to end-of-code would fall off; only real boundaries count.
    let valid = target >= 0
        && (target as usize) < code.len()
        && boundaries.contains(&(target as usize));
    if !valid {
        return Err(VerifyError::InvalidBranchTarget {
            method: method.name.clone(),
            target,
            offset: instr.offset,
        });
    }
    Ok(())
}

fn check_pool_refs(
    class: &ClassFile,
    method: &MethodDef,
    instr: &Instruction,
) -> Result<(), VerifyError> {
    // Offsets of u16 string-pool indices inside the operand bytes
    let index_positions: &[usize] = match instr.opcode {
        Opcode::ConstStr
        | Opcode::GetField
        | Opcode::PutField
        | Opcode::GetProp
        | Opcode::SetProp
        | Opcode::OpInvoke
        | Opcode::New
        | Opcode::InstanceOf
        | Opcode::CheckCast
        | Opcode::LoadClass
        | Opcode::CallDynamic
        | Opcode::CallCtor => &[0],
        Opcode::GetStatic | Opcode::PutStatic | Opcode::CallStatic | Opcode::CallSpecial => &[0, 2],
        _ => &[],
    };

    for &at in index_positions {
        let index = u16::from_le_bytes([instr.operands[at], instr.operands[at + 1]]);
        if class.pool.get(index).is_none() {
            return Err(VerifyError::InvalidPoolRef {
                method: method.name.clone(),
                index,
                offset: instr.offset,
            });
        }
    }
    Ok(())
}

fn check_local_refs(method: &MethodDef, instr: &Instruction) -> Result<(), VerifyError> {
    if !matches!(instr.opcode, Opcode::LoadLocal | Opcode::StoreLocal) {
        return Ok(());
    }
    let slot = u16::from_le_bytes([instr.operands[0], instr.operands[1]]);
    if slot >= method.max_locals {
        return Err(VerifyError::InvalidLocalSlot {
            method: method.name.clone(),
            slot,
            max: method.max_locals,
            offset: instr.offset,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::{access, ExceptionEntry, FieldDef};
    use crate::encoder::BytecodeWriter;

    fn method_with(code: Vec<u8>, max_locals: u16) -> MethodDef {
        MethodDef {
            name: "m".to_string(),
            descriptor: "()void".to_string(),
            access: access::PUBLIC,
            max_locals,
            code,
            exceptions: vec![],
        }
    }

    fn class_with(method: MethodDef) -> ClassFile {
        let mut class = ClassFile::new("demo.T");
        class.methods.push(method);
        class
    }

    #[test]
    fn test_valid_method() {
        let mut w = BytecodeWriter::new();
        w.emit(Opcode::ConstI64);
        w.emit_i64(42);
        w.emit(Opcode::StoreLocal);
        w.emit_u16(0);
        w.emit(Opcode::Return);
        let class = class_with(method_with(w.into_bytes(), 1));
        assert!(verify_class(&class).is_ok());
    }

    #[test]
    fn test_fall_off_end() {
        let mut w = BytecodeWriter::new();
        w.emit(Opcode::ConstNull);
        w.emit(Opcode::Pop);
        let class = class_with(method_with(w.into_bytes(), 0));
        assert!(matches!(
            verify_class(&class),
            Err(VerifyError::FallOffEnd { .. })
        ));
    }

    #[test]
    fn test_invalid_opcode() {
        let class = class_with(method_with(vec![0xFF], 0));
        assert!(matches!(
            verify_class(&class),
            Err(VerifyError::InvalidOpcode { .. })
        ));
    }

    #[test]
    fn test_truncated_operands() {
        // ConstI64 wants 8 operand bytes, only 2 present
        let class = class_with(method_with(vec![Opcode::ConstI64 as u8, 0, 0], 0));
        assert!(matches!(
            verify_class(&class),
            Err(VerifyError::TruncatedOperands { .. })
        ));
    }

    #[test]
    fn test_branch_into_operands_rejected() {
        let mut w = BytecodeWriter::new();
        w.emit(Opcode::Jump);
        w.emit_i16(1); // lands mid-operand of the following ConstI64
        w.emit(Opcode::ConstI64);
        w.emit_i64(0);
        w.emit(Opcode::ReturnValue);
        let class = class_with(method_with(w.into_bytes(), 0));
        assert!(matches!(
            verify_class(&class),
            Err(VerifyError::InvalidBranchTarget { .. })
        ));
    }

    #[test]
    fn test_backward_branch_ok() {
        let mut w = BytecodeWriter::new();
        w.emit(Opcode::ConstTrue); // offset 0
        let at = w.offset();
        w.emit(Opcode::JumpIfTrue);
        w.emit_i16(-((at + 3) as i16)); // back to offset 0
        w.emit(Opcode::Return);
        let class = class_with(method_with(w.into_bytes(), 0));
        assert!(verify_class(&class).is_ok());
    }

    #[test]
    fn test_pool_ref_out_of_range() {
        let mut w = BytecodeWriter::new();
        w.emit(Opcode::ConstStr);
        w.emit_u16(7); // empty pool
        w.emit(Opcode::ReturnValue);
        let class = class_with(method_with(w.into_bytes(), 0));
        assert!(matches!(
            verify_class(&class),
            Err(VerifyError::InvalidPoolRef { .. })
        ));
    }

    #[test]
    fn test_local_slot_out_of_range() {
        let mut w = BytecodeWriter::new();
        w.emit(Opcode::LoadLocal);
        w.emit_u16(3);
        w.emit(Opcode::ReturnValue);
        let class = class_with(method_with(w.into_bytes(), 2));
        assert!(matches!(
            verify_class(&class),
            Err(VerifyError::InvalidLocalSlot { .. })
        ));
    }

    #[test]
    fn test_exception_entry_ranges() {
        let mut w = BytecodeWriter::new();
        w.emit(Opcode::ConstNull); // 0
        w.emit(Opcode::Pop); // 1
        w.emit(Opcode::Return); // 2
        let mut m = method_with(w.into_bytes(), 0);
        m.exceptions.push(ExceptionEntry {
            start: 0,
            end: 2,
            handler: 2,
            catch_type: None,
        });
        assert!(verify_class(&class_with(m.clone())).is_ok());

        m.exceptions[0].end = 99;
        assert!(matches!(
            verify_class(&class_with(m)),
            Err(VerifyError::InvalidExceptionEntry { .. })
        ));
    }

    #[test]
    fn test_abstract_method_skipped() {
        let mut class = ClassFile::new("demo.A");
        class.fields.push(FieldDef {
            name: "f".to_string(),
            type_name: "int".to_string(),
            access: access::PRIVATE,
        });
        class.methods.push(MethodDef {
            name: "pending".to_string(),
            descriptor: "()void".to_string(),
            access: access::PUBLIC | access::ABSTRACT,
            max_locals: 0,
            code: vec![],
            exceptions: vec![],
        });
        assert!(verify_class(&class).is_ok());
    }
}
