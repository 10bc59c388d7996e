//! Bytecode disassembler.
//!
//! Renders chunks for the compiler's dump mode, the VM's execution tracing,
//! and tests. Output is returned as text rather than printed so callers
//! decide the stream.

use crate::chunk::{Chunk, OpCode};
use crate::heap::Heap;

/// Render a whole chunk under a `== name ==` header.
pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str) -> String {
    let mut out = format!("== {name} ==\n");
    let mut offset = 0;
    while offset < chunk.code.len() {
        let (text, next) = disassemble_instruction(heap, chunk, offset);
        out.push_str(&text);
        out.push('\n');
        offset = next;
    }
    out
}

/// Render the instruction at `offset`; returns the text and the offset of
/// the next instruction.
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> (String, usize) {
    let mut text = format!("{offset:04} ");
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        text.push_str("   | ");
    } else {
        text.push_str(&format!("{:4} ", chunk.lines[offset]));
    }

    let Some(op) = OpCode::from_byte(chunk.code[offset]) else {
        text.push_str(&format!("Unknown opcode {}", chunk.code[offset]));
        return (text, offset + 1);
    };
    let name = format!("{op:?}");

    match op {
        OpCode::Constant
        | OpCode::DefineGlobal
        | OpCode::GetGlobal
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::Class
        | OpCode::Method => {
            let constant = chunk.code[offset + 1];
            text.push_str(&format!(
                "{name:<16} {constant:4} '{}'",
                heap.format_value(chunk.constants[constant as usize])
            ));
            (text, offset + 2)
        }
        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call => {
            let slot = chunk.code[offset + 1];
            text.push_str(&format!("{name:<16} {slot:4}"));
            (text, offset + 2)
        }
        OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => {
            let jump = read_u16(chunk, offset + 1) as usize;
            let target = if op == OpCode::Loop {
                offset + 3 - jump
            } else {
                offset + 3 + jump
            };
            text.push_str(&format!("{name:<16} {offset:4} -> {target}"));
            (text, offset + 3)
        }
        OpCode::Invoke => {
            let constant = chunk.code[offset + 1];
            let argc = chunk.code[offset + 2];
            text.push_str(&format!(
                "{name:<16} ({argc} args) {constant:4} '{}'",
                heap.format_value(chunk.constants[constant as usize])
            ));
            (text, offset + 3)
        }
        OpCode::Closure => {
            let constant = chunk.code[offset + 1];
            let value = chunk.constants[constant as usize];
            text.push_str(&format!(
                "{name:<16} {constant:4} {}",
                heap.format_value(value)
            ));
            let mut next = offset + 2;
            if let Some(r) = value.as_obj() {
                for _ in 0..heap.function(r).upvalue_count {
                    let is_local = chunk.code[next];
                    let index = chunk.code[next + 1];
                    text.push_str(&format!(
                        "\n{next:04}      |                     {} {index}",
                        if is_local == 1 { "local" } else { "upvalue" },
                    ));
                    next += 2;
                }
            }
            (text, next)
        }
        _ => {
            text.push_str(&name);
            (text, offset + 1)
        }
    }
}

fn read_u16(chunk: &Chunk, offset: usize) -> u16 {
    (u16::from(chunk.code[offset]) << 8) | u16::from(chunk.code[offset + 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[test]
    fn renders_each_operand_shape() {
        let heap = Heap::new();
        let mut chunk = Chunk::new();
        let constant = chunk.add_constant(Value::number(1.5)).unwrap();
        chunk.write_op(OpCode::Constant, 1);
        chunk.write(constant, 1);
        chunk.write_op(OpCode::GetLocal, 1);
        chunk.write(3, 1);
        chunk.write_op(OpCode::Jump, 2);
        chunk.write(0, 2);
        chunk.write(4, 2);
        chunk.write_op(OpCode::Add, 2);
        chunk.write_op(OpCode::Return, 3);

        let text = disassemble_chunk(&heap, &chunk, "test");
        assert!(text.starts_with("== test ==\n"));
        assert!(text.contains("Constant"));
        assert!(text.contains("'1.5'"));
        assert!(text.contains("GetLocal"));
        assert!(text.contains("Jump"));
        assert!(text.contains("-> 11"));
        assert!(text.contains("Return"));
        // Same-line instructions render the pipe continuation marker.
        assert!(text.contains("   | "));
    }

    #[test]
    fn instruction_stream_length_matches_advertised_offsets() {
        let mut chunk = Chunk::new();
        let heap = Heap::new();
        let constant = chunk.add_constant(Value::number(2.0)).unwrap();
        // Constant(2) Negate(1) Loop(3) Return(1) = 7 bytes, 4 instructions.
        chunk.write_op(OpCode::Constant, 1);
        chunk.write(constant, 1);
        chunk.write_op(OpCode::Negate, 1);
        chunk.write_op(OpCode::Loop, 1);
        chunk.write(0, 1);
        chunk.write(5, 1);
        chunk.write_op(OpCode::Return, 1);

        let mut offset = 0;
        let mut instructions = 0;
        while offset < chunk.code.len() {
            let (_, next) = disassemble_instruction(&heap, &chunk, offset);
            offset = next;
            instructions += 1;
        }
        assert_eq!(offset, chunk.code.len());
        assert_eq!(instructions, 4);
    }
}
