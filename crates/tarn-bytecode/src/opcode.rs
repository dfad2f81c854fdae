//! Opcodes of the Tarn stack machine
//!
//! All opcodes are single-byte instructions; operands follow the opcode
//! byte in the stream, little-endian. Categories:
//! - 0x00-0x0F: stack manipulation & constants
//! - 0x10-0x1F: locals and reference cells
//! - 0x20-0x2F: fields and properties
//! - 0x30-0x3F: calls
//! - 0x40-0x4F: comparisons & logic
//! - 0x50-0x5F: control flow
//! - 0x60-0x6F: objects and classes
//! - 0x70-0x7F: iteration and collections
//! - 0x80-0x8F: monitors

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack manipulation & constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value
    Pop = 0x01,
    /// Duplicate top value
    Dup = 0x02,
    /// Swap top two values
    Swap = 0x03,
    /// Push null
    ConstNull = 0x04,
    /// Push true
    ConstTrue = 0x05,
    /// Push false
    ConstFalse = 0x06,
    /// Push integer constant (operand: i64)
    ConstI64 = 0x07,
    /// Push float constant (operand: f64)
    ConstF64 = 0x08,
    /// Push string constant from pool (operand: u16 index)
    ConstStr = 0x09,

    // ===== Locals and reference cells (0x10-0x1F) =====
    /// Load local variable (operand: u16 slot)
    LoadLocal = 0x10,
    /// Store into local variable (operand: u16 slot)
    StoreLocal = 0x11,
    /// Wrap top of stack in a fresh mutable reference cell
    NewCell = 0x18,
    /// Replace cell on top of stack with its current value
    CellGet = 0x19,
    /// Pop value and cell, store value into cell
    CellSet = 0x1A,

    // ===== Fields and properties (0x20-0x2F) =====
    /// Read instance field (operand: u16 name index)
    GetField = 0x20,
    /// Write instance field; pops value then receiver (operand: u16 name index)
    PutField = 0x21,
    /// Read static field (operands: u16 owner index, u16 name index)
    GetStatic = 0x22,
    /// Write static field (operands: u16 owner index, u16 name index)
    PutStatic = 0x23,
    /// Dynamic property read through the meta layer (operand: u16 name index)
    GetProp = 0x24,
    /// Dynamic property write through the meta layer (operand: u16 name index)
    SetProp = 0x25,

    // ===== Calls (0x30-0x3F) =====
    /// Dynamically dispatched instance call
    /// (operands: u16 name index, u8 arg count)
    CallDynamic = 0x30,
    /// Static call (operands: u16 owner index, u16 name index, u8 arg count)
    CallStatic = 0x31,
    /// Non-virtual instance call against a fixed declaring class
    /// (operands: u16 owner index, u16 name index, u8 arg count)
    CallSpecial = 0x32,
    /// Constructor invocation on an uninitialized instance
    /// (operands: u16 owner index, u8 arg count)
    CallCtor = 0x33,
    /// Operator dispatch under the operator-name convention
    /// (operand: u16 operator-name index); pops rhs then lhs
    OpInvoke = 0x34,

    // ===== Comparisons & logic (0x40-0x4F) =====
    /// Equality via runtime comparison helper
    CmpEq = 0x40,
    CmpNe = 0x41,
    CmpLt = 0x42,
    CmpLe = 0x43,
    CmpGt = 0x44,
    CmpGe = 0x45,
    /// Reference identity
    CmpIdentical = 0x46,
    CmpNotIdentical = 0x47,
    /// Boolean negation
    Not = 0x48,

    // ===== Control flow (0x50-0x5F) =====
    /// Unconditional jump (operand: i16 relative offset)
    Jump = 0x50,
    /// Jump when popped value is true (operand: i16)
    JumpIfTrue = 0x51,
    /// Jump when popped value is false (operand: i16)
    JumpIfFalse = 0x52,
    /// Return void
    Return = 0x53,
    /// Return top of stack
    ReturnValue = 0x54,
    /// Throw top of stack
    Throw = 0x55,

    // ===== Objects and classes (0x60-0x6F) =====
    /// Allocate an uninitialized instance (operand: u16 class-name index)
    New = 0x60,
    /// Type test (operand: u16 class-name index)
    InstanceOf = 0x61,
    /// Checked cast (operand: u16 class-name index)
    CheckCast = 0x62,
    /// Load a class value by name; a not-found condition becomes a fatal
    /// linkage error at run time (operand: u16 class-name index)
    LoadClass = 0x63,
    /// Box a primitive-typed value as an object
    Box = 0x64,
    /// Unbox an object to its primitive value
    Unbox = 0x65,

    // ===== Iteration and collections (0x70-0x7F) =====
    /// Obtain an iterator from the popped value
    IterNew = 0x70,
    /// Push has-next of the iterator on top of stack (kept on stack)
    IterHasNext = 0x71,
    /// Push next element of the iterator on top of stack (kept on stack)
    IterNext = 0x72,
    /// Collect n values into a list (operand: u16 count)
    NewList = 0x78,
    /// Collect n key/value pairs into a map (operand: u16 pair count)
    NewMap = 0x79,
    /// Indexed read; pops index then target
    IndexGet = 0x7A,
    /// Indexed write; pops value, index, target
    IndexSet = 0x7B,

    // ===== Monitors (0x80-0x8F) =====
    /// Enter the monitor of the popped value
    MonitorEnter = 0x80,
    /// Exit the monitor of the popped value
    MonitorExit = 0x81,
}

impl Opcode {
    /// Width in bytes of the operands following this opcode
    pub fn operand_width(&self) -> usize {
        match self {
            Opcode::ConstI64 | Opcode::ConstF64 => 8,
            Opcode::ConstStr
            | Opcode::LoadLocal
            | Opcode::StoreLocal
            | Opcode::GetField
            | Opcode::PutField
            | Opcode::GetProp
            | Opcode::SetProp
            | Opcode::OpInvoke
            | Opcode::Jump
            | Opcode::JumpIfTrue
            | Opcode::JumpIfFalse
            | Opcode::New
            | Opcode::InstanceOf
            | Opcode::CheckCast
            | Opcode::LoadClass
            | Opcode::NewList
            | Opcode::NewMap => 2,
            Opcode::GetStatic | Opcode::PutStatic => 4,
            Opcode::CallDynamic => 3,
            Opcode::CallCtor => 3,
            Opcode::CallStatic | Opcode::CallSpecial => 5,
            _ => 0,
        }
    }

    /// True for instructions that end a control path
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Return | Opcode::ReturnValue | Opcode::Throw | Opcode::Jump
        )
    }

    /// True for relative-branch instructions (i16 offset operand)
    pub fn is_branch(&self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        use Opcode::*;
        Ok(match value {
            0x00 => Nop,
            0x01 => Pop,
            0x02 => Dup,
            0x03 => Swap,
            0x04 => ConstNull,
            0x05 => ConstTrue,
            0x06 => ConstFalse,
            0x07 => ConstI64,
            0x08 => ConstF64,
            0x09 => ConstStr,
            0x10 => LoadLocal,
            0x11 => StoreLocal,
            0x18 => NewCell,
            0x19 => CellGet,
            0x1A => CellSet,
            0x20 => GetField,
            0x21 => PutField,
            0x22 => GetStatic,
            0x23 => PutStatic,
            0x24 => GetProp,
            0x25 => SetProp,
            0x30 => CallDynamic,
            0x31 => CallStatic,
            0x32 => CallSpecial,
            0x33 => CallCtor,
            0x34 => OpInvoke,
            0x40 => CmpEq,
            0x41 => CmpNe,
            0x42 => CmpLt,
            0x43 => CmpLe,
            0x44 => CmpGt,
            0x45 => CmpGe,
            0x46 => CmpIdentical,
            0x47 => CmpNotIdentical,
            0x48 => Not,
            0x50 => Jump,
            0x51 => JumpIfTrue,
            0x52 => JumpIfFalse,
            0x53 => Return,
            0x54 => ReturnValue,
            0x55 => Throw,
            0x60 => New,
            0x61 => InstanceOf,
            0x62 => CheckCast,
            0x63 => LoadClass,
            0x64 => Box,
            0x65 => Unbox,
            0x70 => IterNew,
            0x71 => IterHasNext,
            0x72 => IterNext,
            0x78 => NewList,
            0x79 => NewMap,
            0x7A => IndexGet,
            0x7B => IndexSet,
            0x80 => MonitorEnter,
            0x81 => MonitorExit,
            other => return Err(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_opcodes() {
        for byte in 0u8..=0xFF {
            if let Ok(op) = Opcode::try_from(byte) {
                assert_eq!(op as u8, byte);
            }
        }
    }

    #[test]
    fn test_terminators() {
        assert!(Opcode::Return.is_terminator());
        assert!(Opcode::Throw.is_terminator());
        assert!(!Opcode::JumpIfTrue.is_terminator());
        assert!(!Opcode::CallDynamic.is_terminator());
    }

    #[test]
    fn test_operand_widths() {
        assert_eq!(Opcode::Nop.operand_width(), 0);
        assert_eq!(Opcode::ConstI64.operand_width(), 8);
        assert_eq!(Opcode::CallStatic.operand_width(), 5);
        assert_eq!(Opcode::CallDynamic.operand_width(), 3);
        assert_eq!(Opcode::GetStatic.operand_width(), 4);
    }
}
