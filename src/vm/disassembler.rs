//! Bytecode disassembler for debug output.

use super::chunk::Chunk;
use super::heap::Heap;
use super::opcode::Op;
use super::value::{ObjRef, Value};

/// Disassemble a function to a human-readable string, recursing into the
/// functions in its constant pool. Output is stable and usable as a golden.
pub fn disassemble(heap: &Heap, function: ObjRef) -> String {
    let mut out = String::new();
    let func = heap.function(function);
    let name = match func.name {
        Some(name) => heap.string(name).chars.clone(),
        None => "<script>".to_string(),
    };
    out.push_str(&format!(
        "== {} (arity={}, upvalues={}) ==\n",
        name,
        func.arity,
        func.upvalues.len()
    ));
    disassemble_chunk(heap, &func.chunk, &mut out);

    for &constant in &func.chunk.constants {
        if constant.is_obj() {
            if let super::object::Obj::Function(_) = heap.get(constant.as_obj()) {
                out.push('\n');
                out.push_str(&disassemble(heap, constant.as_obj()));
            }
        }
    }
    out
}

fn disassemble_chunk(heap: &Heap, chunk: &Chunk, out: &mut String) {
    for (offset, op) in chunk.code.iter().enumerate() {
        out.push_str(&instruction_at(heap, chunk, offset, *op));
        out.push('\n');
    }
}

/// One disassembled instruction, with the line column collapsing repeats.
pub fn instruction_at(heap: &Heap, chunk: &Chunk, offset: usize, op: Op) -> String {
    let line = chunk.line(offset);
    let line_str = if offset > 0 && chunk.line(offset - 1) == line {
        "   |".to_string()
    } else {
        format!("{:4}", line)
    };
    format!("{:04} {} {}", offset, line_str, operation(heap, chunk, op))
}

fn operation(heap: &Heap, chunk: &Chunk, op: Op) -> String {
    match op {
        Op::Constant(idx) => format!("CONSTANT      {:>4} ({})", idx, constant(heap, chunk, idx)),
        Op::Nil => "NIL".to_string(),
        Op::True => "TRUE".to_string(),
        Op::False => "FALSE".to_string(),
        Op::Pop => "POP".to_string(),
        Op::GetLocal(slot) => format!("GET_LOCAL     {:>4}", slot),
        Op::SetLocal(slot) => format!("SET_LOCAL     {:>4}", slot),
        Op::GetGlobal(idx) => format!("GET_GLOBAL    {:>4} ({})", idx, constant(heap, chunk, idx)),
        Op::DefineGlobal(idx) => {
            format!("DEF_GLOBAL    {:>4} ({})", idx, constant(heap, chunk, idx))
        }
        Op::SetGlobal(idx) => format!("SET_GLOBAL    {:>4} ({})", idx, constant(heap, chunk, idx)),
        Op::GetUpvalue(idx) => format!("GET_UPVALUE   {:>4}", idx),
        Op::SetUpvalue(idx) => format!("SET_UPVALUE   {:>4}", idx),
        Op::CloseUpvalue => "CLOSE_UPVALUE".to_string(),
        Op::GetProperty(idx) => {
            format!("GET_PROPERTY  {:>4} ({})", idx, constant(heap, chunk, idx))
        }
        Op::SetProperty(idx) => {
            format!("SET_PROPERTY  {:>4} ({})", idx, constant(heap, chunk, idx))
        }
        Op::GetSuper(idx) => format!("GET_SUPER     {:>4} ({})", idx, constant(heap, chunk, idx)),
        Op::Equal => "EQUAL".to_string(),
        Op::Greater => "GREATER".to_string(),
        Op::Less => "LESS".to_string(),
        Op::Add => "ADD".to_string(),
        Op::Subtract => "SUBTRACT".to_string(),
        Op::Multiply => "MULTIPLY".to_string(),
        Op::Divide => "DIVIDE".to_string(),
        Op::Not => "NOT".to_string(),
        Op::Negate => "NEGATE".to_string(),
        Op::Print => "PRINT".to_string(),
        Op::Jump(offset) => format!("JUMP          {:>4}", offset),
        Op::JumpIfFalse(offset) => format!("JUMP_IF_FALSE {:>4}", offset),
        Op::Loop(offset) => format!("LOOP          {:>4}", offset),
        Op::Call(argc) => format!("CALL          {:>4}", argc),
        Op::Invoke(idx, argc) => format!(
            "INVOKE        {:>4} ({}) argc={}",
            idx,
            constant(heap, chunk, idx),
            argc
        ),
        Op::SuperInvoke(idx, argc) => format!(
            "SUPER_INVOKE  {:>4} ({}) argc={}",
            idx,
            constant(heap, chunk, idx),
            argc
        ),
        Op::Closure(idx) => format!("CLOSURE       {:>4} ({})", idx, constant(heap, chunk, idx)),
        Op::Return => "RETURN".to_string(),
        Op::Class(idx) => format!("CLASS         {:>4} ({})", idx, constant(heap, chunk, idx)),
        Op::Inherit => "INHERIT".to_string(),
        Op::Method(idx) => format!("METHOD        {:>4} ({})", idx, constant(heap, chunk, idx)),
    }
}

fn constant(heap: &Heap, chunk: &Chunk, idx: u8) -> String {
    match chunk.constants.get(idx as usize) {
        Some(&value) => format_constant(heap, value),
        None => "???".to_string(),
    }
}

fn format_constant(heap: &Heap, value: Value) -> String {
    if value.is_obj() {
        if let super::object::Obj::String(s) = heap.get(value.as_obj()) {
            return format!("\"{}\"", s.chars);
        }
    }
    heap.value_to_string(value)
}
